//! Statement partitioning: canonicalize the document and its selection,
//! then split the canonical statement list into mandatory and
//! non-mandatory index sets. Canonical blank-node labels differ between
//! the two canonicalizations, so statements are compared with the labels
//! stripped.

use crate::disclosure::pointer::JsonPointer;
use crate::disclosure::select::select_fragments;
use crate::disclosure::{Canonicalizer, SelectionError};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// The partition of a canonical statement list. The two index sets are
/// disjoint and together cover `0..all_statements.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementPartition {
    pub all_statements: Vec<String>,
    pub mandatory_indices: BTreeSet<usize>,
    pub non_mandatory_indices: BTreeSet<usize>,
}

impl StatementPartition {
    pub fn mandatory_statements(&self) -> Vec<&str> {
        self.mandatory_indices
            .iter()
            .map(|&i| self.all_statements[i].as_str())
            .collect()
    }

    pub fn non_mandatory_statements(&self) -> Vec<&str> {
        self.non_mandatory_indices
            .iter()
            .map(|&i| self.all_statements[i].as_str())
            .collect()
    }

    /// Applies the same index split to another equally long statement
    /// list, e.g. the HMAC-relabelled variant the cryptosuite signs.
    pub fn apply_to<'a>(
        &self,
        other: &'a [String],
    ) -> Result<(Vec<&'a str>, Vec<&'a str>), SelectionError> {
        if other.len() != self.all_statements.len() {
            return Err(SelectionError::PartitionMismatch {
                expected: self.all_statements.len(),
                actual: other.len(),
            });
        }
        let mandatory = self
            .mandatory_indices
            .iter()
            .map(|&i| other[i].as_str())
            .collect();
        let non_mandatory = self
            .non_mandatory_indices
            .iter()
            .map(|&i| other[i].as_str())
            .collect();
        Ok((mandatory, non_mandatory))
    }
}

/// Canonicalizes `doc`, canonicalizes the selection for `pointers`, and
/// marks each canonical statement mandatory iff it appears in the
/// selection's canonical form (modulo blank-node relabeling).
pub async fn partition_statements(
    doc: &Value,
    pointers: &[JsonPointer],
    canonicalizer: &dyn Canonicalizer,
) -> Result<StatementPartition, SelectionError> {
    let all_statements = canonical_lines(doc, canonicalizer).await?;

    let mut mandatory_pool: HashMap<String, usize> = HashMap::new();
    if !pointers.is_empty() {
        let selection = select_fragments(doc, pointers)?;
        for line in canonical_lines(&selection, canonicalizer).await? {
            *mandatory_pool.entry(strip_blank_labels(&line)).or_insert(0) += 1;
        }
    }

    let mut mandatory_indices = BTreeSet::new();
    let mut non_mandatory_indices = BTreeSet::new();
    for (index, statement) in all_statements.iter().enumerate() {
        let key = strip_blank_labels(statement);
        match mandatory_pool.get_mut(&key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                mandatory_indices.insert(index);
            }
            _ => {
                non_mandatory_indices.insert(index);
            }
        }
    }

    Ok(StatementPartition {
        all_statements,
        mandatory_indices,
        non_mandatory_indices,
    })
}

async fn canonical_lines(
    doc: &Value,
    canonicalizer: &dyn Canonicalizer,
) -> Result<Vec<String>, SelectionError> {
    let n_quads = canonicalizer
        .canonicalize(doc)
        .await
        .map_err(|err| SelectionError::CanonicalizationFailed(err.into()))?;
    Ok(n_quads
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect())
}

/// Rewrites every blank-node label outside of literals to `_:b`, so two
/// canonicalizations that labelled the same node differently still
/// compare equal position by position.
fn strip_blank_labels(statement: &str) -> String {
    let mut out = String::with_capacity(statement.len());
    let mut chars = statement.chars().peekable();
    let mut in_literal = false;
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if in_literal {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_literal = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_literal = true;
                out.push(c);
            }
            '_' if chars.peek() == Some(&':') => {
                chars.next();
                while chars
                    .peek()
                    .is_some_and(|&n| n.is_ascii_alphanumeric() || n == '_' || n == '-')
                {
                    chars.next();
                }
                out.push_str("_:b");
            }
            _ => out.push(c),
        }
    }
    out
}
