//! Materialized replica state.
//!
//! A fold of the mutation log through last-writer-wins per
//! `(dataset, row, column)`. The winner of a field is the message with the
//! greatest timestamp, which depends only on the set of messages applied and
//! not on their order.

use ledgersync_codec::{Message, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Address of one field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    /// Logical table.
    pub dataset: String,
    /// Record identifier.
    pub row: String,
    /// Field identifier.
    pub column: String,
}

impl FieldKey {
    /// Creates a field key.
    pub fn new(dataset: impl Into<String>, row: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
        }
    }

    /// The field a message writes.
    #[must_use]
    pub fn of(message: &Message) -> Self {
        Self::new(&*message.dataset, &*message.row, &*message.column)
    }
}

/// Current value of a field and the timestamp that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Winning value.
    pub value: Value,
    /// Timestamp of the winning message.
    pub timestamp: Timestamp,
}

/// The last-writer-wins projection of the log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replica {
    cells: BTreeMap<FieldKey, Cell>,
}

impl Replica {
    /// Creates an empty replica.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one message in. Returns true if it now holds its field.
    pub fn merge(&mut self, message: &Message) -> bool {
        let key = FieldKey::of(message);
        match self.cells.get_mut(&key) {
            Some(cell) if cell.timestamp >= message.timestamp => false,
            Some(cell) => {
                cell.value = message.value.clone();
                cell.timestamp = message.timestamp;
                true
            }
            None => {
                self.cells.insert(
                    key,
                    Cell {
                        value: message.value.clone(),
                        timestamp: message.timestamp,
                    },
                );
                true
            }
        }
    }

    /// Current cell of a field.
    #[must_use]
    pub fn cell(&self, dataset: &str, row: &str, column: &str) -> Option<&Cell> {
        self.cells.get(&FieldKey::new(dataset, row, column))
    }

    /// Current value of a field.
    #[must_use]
    pub fn get(&self, dataset: &str, row: &str, column: &str) -> Option<&Value> {
        self.cell(dataset, row, column).map(|c| &c.value)
    }

    /// All fields of one row, by column.
    #[must_use]
    pub fn row(&self, dataset: &str, row: &str) -> BTreeMap<String, Value> {
        let start = FieldKey::new(dataset, row, "");
        self.cells
            .range(start..)
            .take_while(|(k, _)| k.dataset == dataset && k.row == row)
            .map(|(k, c)| (k.column.clone(), c.value.clone()))
            .collect()
    }

    /// Number of fields with a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true if no field has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Drops every field.
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Iterates fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &Cell)> {
        self.cells.iter()
    }

    pub(crate) fn to_cells(&self) -> Vec<(FieldKey, Cell)> {
        self.cells
            .iter()
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect()
    }

    pub(crate) fn from_cells(cells: Vec<(FieldKey, Cell)>) -> Self {
        Self {
            cells: cells.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_codec::NodeId;
    use proptest::prelude::*;

    fn msg(millis: u64, node: u16, row: &str, column: &str, value: impl Into<Value>) -> Message {
        Message::new(
            Timestamp::new(millis, NodeId::new(node), 0),
            "categories",
            row,
            column,
            value,
        )
    }

    #[test]
    fn later_write_wins_in_either_order() {
        let t1 = msg(1, 1, "cat1", "name", "Groceries");
        let t2 = msg(2, 2, "cat1", "name", "Food");

        let mut forward = Replica::new();
        assert!(forward.merge(&t1));
        assert!(forward.merge(&t2));

        let mut backward = Replica::new();
        assert!(backward.merge(&t2));
        assert!(!backward.merge(&t1));

        assert_eq!(forward, backward);
        assert_eq!(forward.get("categories", "cat1", "name"), Some(&Value::from("Food")));
    }

    #[test]
    fn remerging_the_winner_is_a_no_op() {
        let t1 = msg(1, 1, "cat1", "name", "Groceries");
        let mut replica = Replica::new();
        assert!(replica.merge(&t1));
        assert!(!replica.merge(&t1));
        assert_eq!(replica.len(), 1);
    }

    #[test]
    fn row_collects_only_that_row() {
        let mut replica = Replica::new();
        replica.merge(&msg(1, 1, "cat1", "name", "Food"));
        replica.merge(&msg(2, 1, "cat1", "hidden", false));
        replica.merge(&msg(3, 1, "cat10", "name", "Rent"));
        replica.merge(&msg(4, 1, "cat", "name", "Misc"));

        let row = replica.row("categories", "cat1");
        assert_eq!(row.len(), 2);
        assert_eq!(row["name"], Value::from("Food"));
        assert_eq!(row["hidden"], Value::Bool(false));
        assert!(replica.row("payees", "cat1").is_empty());
    }

    #[test]
    fn cells_roundtrip() {
        let mut replica = Replica::new();
        replica.merge(&msg(1, 1, "a", "x", 5_i64));
        replica.merge(&msg(2, 1, "b", "y", Value::Null));
        assert_eq!(Replica::from_cells(replica.to_cells()), replica);
    }

    proptest! {
        #[test]
        fn converges_regardless_of_order(
            writes in prop::collection::vec((0u64..50, 0u16..3, 0usize..3, 0usize..2, any::<i64>()), 1..40),
            seed in any::<u64>(),
        ) {
            let rows = ["r0", "r1", "r2"];
            let cols = ["amount", "payee"];
            let mut seen = std::collections::HashSet::new();
            let messages: Vec<Message> = writes
                .into_iter()
                .filter(|(t, n, ..)| seen.insert((*t, *n)))
                .map(|(t, n, r, c, v)| msg(t, n, rows[r], cols[c], v))
                .collect();

            let mut shuffled = messages.clone();
            // Deterministic Fisher-Yates driven by the seed.
            let mut state = seed | 1;
            for i in (1..shuffled.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                shuffled.swap(i, (state % (i as u64 + 1)) as usize);
            }

            let mut a = Replica::new();
            let mut b = Replica::new();
            for m in &messages {
                a.merge(m);
            }
            for m in &shuffled {
                b.merge(m);
                b.merge(m);
            }
            prop_assert_eq!(a, b);
        }
    }
}
