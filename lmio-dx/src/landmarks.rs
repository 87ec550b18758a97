//! Landmark groups and their in-memory edit history
//!
//! The payload is kept as opaque LJSON; interpretation belongs to whoever
//! renders or edits it. What matters here is which payload is current and
//! whether it matches what was last written to the backend.

use serde_json::Value;

/// Linear history of landmark payloads for one asset
#[derive(Debug, Clone, PartialEq)]
pub struct EditLog {
    history: Vec<Value>,
    head: usize,
    /// History index that matches the backend copy, if any still does
    saved: Option<usize>,
}

impl EditLog {
    /// Start a log whose first entry is the payload as loaded from the backend
    pub fn new(loaded: Value) -> Self {
        Self {
            history: vec![loaded],
            head: 0,
            saved: Some(0),
        }
    }

    pub fn current(&self) -> &Value {
        &self.history[self.head]
    }

    /// Append a new state, dropping any redo tail; identical states are ignored
    pub fn record(&mut self, state: Value) {
        if *self.current() == state {
            return;
        }
        self.history.truncate(self.head + 1);
        if matches!(self.saved, Some(s) if s > self.head) {
            self.saved = None;
        }
        self.history.push(state);
        self.head += 1;
    }

    pub fn can_undo(&self) -> bool {
        self.head > 0
    }

    pub fn can_redo(&self) -> bool {
        self.head + 1 < self.history.len()
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.head -= 1;
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.head += 1;
        true
    }

    pub fn mark_saved(&mut self) {
        self.saved = Some(self.head);
    }

    /// True when the current payload is the one last saved (or loaded)
    pub fn is_current(&self) -> bool {
        self.saved == Some(self.head)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Landmarks of one asset under one template
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkGroup {
    pub asset_id: String,
    pub template: String,
    log: EditLog,
}

impl LandmarkGroup {
    /// Attach a fetched payload to an asset, continuing `log` when one exists
    ///
    /// With an existing log the payload becomes its newest entry, so a payload
    /// that differs from the last saved one shows up as an unsaved edit.
    pub fn parse(json: Value, asset_id: &str, template: &str, log: Option<EditLog>) -> Self {
        let log = match log {
            Some(mut log) => {
                log.record(json);
                log
            }
            None => EditLog::new(json),
        };

        Self {
            asset_id: asset_id.to_string(),
            template: template.to_string(),
            log,
        }
    }

    pub fn payload(&self) -> &Value {
        self.log.current()
    }

    pub fn log(&self) -> &EditLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut EditLog {
        &mut self.log
    }

    pub fn into_log(self) -> EditLog {
        self.log
    }

    pub fn is_current(&self) -> bool {
        self.log.is_current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fresh_log_is_current() {
        let log = EditLog::new(json!({"groups": []}));
        assert!(log.is_current());
        assert!(!log.can_undo());
    }

    #[test]
    fn test_edit_then_undo_returns_to_saved() {
        let mut log = EditLog::new(json!(1));
        log.record(json!(2));
        assert!(!log.is_current());

        assert!(log.undo());
        assert!(log.is_current());
        assert!(log.redo());
        assert_eq!(log.current(), &json!(2));
    }

    #[test]
    fn test_recording_identical_state_is_noop() {
        let mut log = EditLog::new(json!(1));
        log.record(json!(1));
        assert_eq!(log.len(), 1);
        assert!(log.is_current());
    }

    #[test]
    fn test_branching_past_saved_point_forgets_it() {
        let mut log = EditLog::new(json!(1));
        log.record(json!(2));
        log.mark_saved();
        log.undo();
        log.record(json!(3));

        assert!(!log.is_current());
        log.undo();
        assert!(!log.is_current(), "state 1 was never the saved one after saving 2");
    }

    #[test]
    fn test_parse_with_existing_log_marks_difference_unsaved() {
        let mut log = EditLog::new(json!({"a": 1}));
        log.record(json!({"a": 2}));
        log.mark_saved();

        let group = LandmarkGroup::parse(json!({"a": 9}), "b.jpg", "face", Some(log));
        assert_eq!(group.payload(), &json!({"a": 9}));
        assert!(!group.is_current());
        assert!(group.log().can_undo());

        let again = LandmarkGroup::parse(json!({"a": 2}), "b.jpg", "face", Some(group.into_log()));
        assert_eq!(again.payload(), &json!({"a": 2}));
        assert_eq!(again.log().len(), 4);
    }
}
