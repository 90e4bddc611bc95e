use crate::sheet::Row;

/// Rows selected on the portal and waiting for one bulk action.
#[derive(Debug)]
pub struct Batch {
    rows: Vec<Row>,
    capacity: usize,
}

impl Batch {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rows: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Empty the batch, returning what it held.
    pub fn take(&mut self) -> Vec<Row> {
        std::mem::replace(&mut self.rows, Vec::with_capacity(self.capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str) -> Row {
        Row::from_cells(&["NED".to_string()], &[json!(id)])
    }

    #[test]
    fn fills_to_capacity() {
        let mut batch = Batch::new(3);
        assert!(batch.is_empty());
        batch.push(row("a"));
        batch.push(row("b"));
        assert!(!batch.is_full());
        batch.push(row("c"));
        assert!(batch.is_full());
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn take_resets() {
        let mut batch = Batch::new(2);
        batch.push(row("a"));
        let rows = batch.take();
        assert_eq!(rows.len(), 1);
        assert!(batch.is_empty());
        assert!(!batch.is_full());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut batch = Batch::new(0);
        batch.push(row("a"));
        assert!(batch.is_full());
    }
}
