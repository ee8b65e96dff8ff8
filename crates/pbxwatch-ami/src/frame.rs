//! Record framing for the manager protocol.
//!
//! A record is a consecutive run of `Key: Value` lines ended by a blank line.
//! Lines without a colon are ignored (the banner line sent on connect is
//! one of them). Header names are matched case-insensitively because the PBX
//! is not consistent about them (`Linkedid` vs `LinkedId`).

use std::collections::HashMap;

/// One decoded record: header name → value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRecord {
    fields: HashMap<String, String>,
}

impl EventRecord {
    /// Builds a record from `(key, value)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut record = Self::default();
        for (key, value) in pairs {
            record.insert(key, value);
        }
        record
    }

    /// Sets a header, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: &str) {
        self.fields
            .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    /// Returns a header value, or `""` when absent.
    pub fn get(&self, key: &str) -> &str {
        self.fields
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Returns the `Event` tag, if the record carries a non-empty one.
    pub fn event_type(&self) -> Option<&str> {
        Some(self.get("Event")).filter(|tag| !tag.is_empty())
    }

    /// Number of headers in the record.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no headers.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Incremental line-to-record framer.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    pending: EventRecord,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw line (with or without its line terminator).
    ///
    /// Returns the completed record when `line` is the blank terminator of a
    /// non-empty record.
    pub fn push_line(&mut self, line: &str) -> Option<EventRecord> {
        let line = line.trim();
        if line.is_empty() {
            if self.pending.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.pending));
        }

        if let Some((key, value)) = line.split_once(':') {
            self.pending.insert(key, value);
        }
        None
    }

    /// Whether a partially received record is buffered.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Serializes a command frame: `Action: <name>`, one line per field, then a
/// blank line. Fields are written in the given order.
pub fn encode_action(name: &str, fields: &[(&str, &str)]) -> String {
    let mut frame = format!("Action: {name}\r\n");
    for (key, value) in fields {
        frame.push_str(key);
        frame.push_str(": ");
        frame.push_str(value);
        frame.push_str("\r\n");
    }
    frame.push_str("\r\n");
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut RecordDecoder, input: &str) -> Vec<EventRecord> {
        input
            .split_inclusive('\n')
            .filter_map(|line| decoder.push_line(line))
            .collect()
    }

    #[test]
    fn frames_records_on_blank_lines() {
        let mut decoder = RecordDecoder::new();
        let records = feed(
            &mut decoder,
            "Event: Hangup\r\nChannel: PJSIP/101-00000001\r\nLinkedid: 1700.1\r\n\r\n\
             Event: PeerStatus\r\nPeer: PJSIP/102\r\n\r\n",
        );

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_type(), Some("Hangup"));
        assert_eq!(records[0].get("Channel"), "PJSIP/101-00000001");
        assert_eq!(records[1].get("Peer"), "PJSIP/102");
        assert!(!decoder.has_partial());
    }

    #[test]
    fn ignores_lines_without_separator() {
        let mut decoder = RecordDecoder::new();
        let records = feed(
            &mut decoder,
            "Asterisk Call Manager/7.0.3\r\nEvent: Newstate\r\ngarbage line\r\n\r\n",
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 1);
    }

    #[test]
    fn value_keeps_text_after_first_colon() {
        let mut decoder = RecordDecoder::new();
        let records = feed(&mut decoder, "Event: ContactStatus\nURI: sip:101@10.0.0.5:5060\n\n");
        assert_eq!(records[0].get("URI"), "sip:101@10.0.0.5:5060");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let record = EventRecord::from_pairs([("Event", "CoreShowChannel"), ("LinkedId", "1700.9")]);
        assert_eq!(record.get("Linkedid"), "1700.9");
        assert_eq!(record.get("missing"), "");
    }

    #[test]
    fn consecutive_blank_lines_do_not_emit_empty_records() {
        let mut decoder = RecordDecoder::new();
        assert!(feed(&mut decoder, "\r\n\r\n\r\n").is_empty());
    }

    #[test]
    fn partial_record_stays_buffered() {
        let mut decoder = RecordDecoder::new();
        assert!(feed(&mut decoder, "Event: Hangup\r\nChannel: PJSIP/1").is_empty());
        assert!(decoder.has_partial());
    }

    #[test]
    fn record_without_event_tag_has_no_type() {
        let record = EventRecord::from_pairs([("Response", "Success")]);
        assert_eq!(record.event_type(), None);
    }

    #[test]
    fn encodes_action_frame() {
        let frame = encode_action("Hangup", &[("Channel", "PJSIP/101-00000001")]);
        assert_eq!(
            frame,
            "Action: Hangup\r\nChannel: PJSIP/101-00000001\r\n\r\n"
        );
        assert_eq!(encode_action("QueueStatus", &[]), "Action: QueueStatus\r\n\r\n");
    }
}
