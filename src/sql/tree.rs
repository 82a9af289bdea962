//! Logical query tree for LockstepDB
//!
//! SELECT statements are shaped into a tree of relational operators by
//! `plan_select`. Each node kind has a fixed arity: `Table` is the only leaf,
//! every other kind wraps exactly one child. Condition strings are carried
//! verbatim and parsed by the evaluator.

use std::fmt;

use crate::sql::parser::SelectQuery;

/// A node in the logical query tree
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// Scan of a named table
    Table { name: String },
    /// Filter by a single `column op literal` predicate
    Selection {
        predicate: String,
        child: Box<QueryNode>,
    },
    /// Restrict and rename columns: `col [AS alias], ...`
    Projection {
        columns: String,
        child: Box<QueryNode>,
    },
    /// Stable sort: `column [ASC|DESC]`
    Sort { order: String, child: Box<QueryNode> },
    /// Row cap: a non-negative integer
    Limit { count: String, child: Box<QueryNode> },
}

impl QueryNode {
    /// Child node, if this kind has one
    pub fn child(&self) -> Option<&QueryNode> {
        match self {
            QueryNode::Table { .. } => None,
            QueryNode::Selection { child, .. }
            | QueryNode::Projection { child, .. }
            | QueryNode::Sort { child, .. }
            | QueryNode::Limit { child, .. } => Some(child),
        }
    }

    /// Collect the table names referenced by this tree, bottom-up
    pub fn table_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_tables(&mut names);
        names
    }

    fn collect_tables(&self, names: &mut Vec<String>) {
        if let Some(child) = self.child() {
            child.collect_tables(names);
        }
        if let QueryNode::Table { name } = self {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_node(node: &QueryNode, level: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let indent = "    ".repeat(level);
            match node {
                QueryNode::Table { name } => writeln!(f, "{}table: {}", indent, name)?,
                QueryNode::Selection { predicate, .. } => {
                    writeln!(f, "{}selection: {}", indent, predicate)?
                }
                QueryNode::Projection { columns, .. } => {
                    writeln!(f, "{}projection: {}", indent, columns)?
                }
                QueryNode::Sort { order, .. } => writeln!(f, "{}sort: {}", indent, order)?,
                QueryNode::Limit { count, .. } => writeln!(f, "{}limit: {}", indent, count)?,
            }
            if let Some(child) = node.child() {
                write_node(child, level + 1, f)?;
            }
            Ok(())
        }
        write_node(self, 0, f)
    }
}

/// Shape a parsed SELECT into a query tree.
///
/// The selection sits directly above the scan so the evaluator can push the
/// predicate into the storage read; sort runs before limit, and the projection
/// is applied last.
pub fn plan_select(query: &SelectQuery) -> QueryNode {
    let mut node = QueryNode::Table {
        name: query.table.clone(),
    };

    if let Some(predicate) = &query.predicate {
        node = QueryNode::Selection {
            predicate: predicate.to_string(),
            child: Box::new(node),
        };
    }

    if let Some((column, direction)) = &query.order {
        node = QueryNode::Sort {
            order: format!("{} {}", column, direction),
            child: Box::new(node),
        };
    }

    if let Some(limit) = query.limit {
        node = QueryNode::Limit {
            count: limit.to_string(),
            child: Box::new(node),
        };
    }

    if let Some(columns) = &query.columns {
        let spec = columns
            .iter()
            .map(|(name, alias)| match alias {
                Some(alias) => format!("{} AS {}", name, alias),
                None => name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        node = QueryNode::Projection {
            columns: spec,
            child: Box::new(node),
        };
    }

    node
}
