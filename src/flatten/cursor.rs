use crate::flatten::resolver::Resolution;
use serde_json::Value;

/// What a flattenable level iterates over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelKind {
    /// The synthetic level holding the top-level document itself
    Top,
    /// An array of sub-documents
    Documents,
    /// An array of scalar values
    Scalars,
}

#[derive(Debug, Clone, PartialEq)]
enum CursorState {
    Unpopulated,
    Populated { elements: Vec<Value>, index: usize },
    Exhausted,
}

/// Iteration state of one flattenable level
///
/// The cursor is filled from its parent's current container the first time
/// the level is visited, and reset whenever the parent moves on.
#[derive(Debug, Clone)]
pub struct ArrayLevelCursor {
    state: CursorState,
}

impl Default for ArrayLevelCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayLevelCursor {
    pub fn new() -> Self {
        ArrayLevelCursor {
            state: CursorState::Unpopulated,
        }
    }

    /// Fill the cursor with the elements under the parent's current position.
    /// Does nothing once populated; an empty or absent source is exhausted
    /// right away.
    pub fn populate(&mut self, source: Resolution) {
        if self.state != CursorState::Unpopulated {
            return;
        }

        let elements = match source {
            Resolution::Absent => Vec::new(),
            Resolution::Documents(docs) => docs,
            Resolution::Scalar(Value::Array(values)) => values,
            Resolution::Document(doc) => vec![doc],
            Resolution::Scalar(value) => vec![value],
        };

        self.state = if elements.is_empty() {
            CursorState::Exhausted
        } else {
            CursorState::Populated { elements, index: 0 }
        };
    }

    /// Move to the next element, returning whether one exists
    pub fn step(&mut self) -> bool {
        let exhausted = match &mut self.state {
            CursorState::Populated { elements, index } => {
                *index += 1;
                *index >= elements.len()
            }
            CursorState::Unpopulated | CursorState::Exhausted => return false,
        };

        if exhausted {
            self.state = CursorState::Exhausted;
        }
        !exhausted
    }

    /// Element at the current index; `None` before populating or once exhausted
    pub fn current(&self) -> Option<&Value> {
        match &self.state {
            CursorState::Populated { elements, index } => elements.get(*index),
            CursorState::Unpopulated | CursorState::Exhausted => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = CursorState::Unpopulated;
    }

    pub fn index(&self) -> Option<usize> {
        match &self.state {
            CursorState::Populated { index, .. } => Some(*index),
            CursorState::Unpopulated | CursorState::Exhausted => None,
        }
    }

    pub fn len(&self) -> usize {
        match &self.state {
            CursorState::Populated { elements, .. } => elements.len(),
            CursorState::Unpopulated | CursorState::Exhausted => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_populated(&self) -> bool {
        self.state != CursorState::Unpopulated
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_steps_through_documents() {
        let mut cursor = ArrayLevelCursor::new();
        assert!(cursor.current().is_none());
        assert!(!cursor.step());

        cursor.populate(Resolution::Documents(vec![json!({"x": 1}), json!({"x": 2})]));
        assert_eq!(cursor.current(), Some(&json!({"x": 1})));
        assert_eq!(cursor.index(), Some(0));

        assert!(cursor.step());
        assert_eq!(cursor.current(), Some(&json!({"x": 2})));

        assert!(!cursor.step());
        assert!(cursor.is_exhausted());
        assert!(cursor.current().is_none());
    }

    #[test]
    fn test_populate_is_once_per_parent_position() {
        let mut cursor = ArrayLevelCursor::new();
        cursor.populate(Resolution::Scalar(json!(["a", "b"])));
        cursor.step();
        cursor.populate(Resolution::Scalar(json!(["z"])));
        assert_eq!(cursor.current(), Some(&json!("b")));

        cursor.reset();
        assert!(!cursor.is_populated());
        cursor.populate(Resolution::Scalar(json!(["z"])));
        assert_eq!(cursor.current(), Some(&json!("z")));
        assert_eq!(cursor.len(), 1);
    }

    #[test]
    fn test_empty_source_is_exhausted() {
        let mut cursor = ArrayLevelCursor::new();
        cursor.populate(Resolution::Absent);
        assert!(cursor.is_exhausted());
        assert!(cursor.current().is_none());
        assert!(!cursor.step());

        let mut cursor = ArrayLevelCursor::new();
        cursor.populate(Resolution::Documents(vec![]));
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_single_document_is_one_element() {
        let mut cursor = ArrayLevelCursor::new();
        cursor.populate(Resolution::Document(json!({"x": 1})));
        assert_eq!(cursor.len(), 1);
        assert!(!cursor.step());
    }
}
