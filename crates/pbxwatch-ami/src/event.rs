//! Typed decoding of the event families the monitor consumes.

use crate::frame::EventRecord;

/// Channel-scoped call signaling shared by dial, ringing and bridge events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSignal {
    /// Low-level channel name, e.g. `PJSIP/101-0000002a`.
    pub channel: String,
    /// `ChannelStateDesc`; empty when the event does not carry one.
    pub channel_state: String,
    /// Linkage id shared by every leg of the call.
    pub linked_id: String,
    /// Caller number.
    pub caller_id_num: String,
    /// Number of the party on the other end of this channel.
    pub connected_line_num: String,
}

impl ChannelSignal {
    fn from_record(record: &EventRecord) -> Self {
        Self {
            channel: record.get("Channel").to_string(),
            channel_state: record.get("ChannelStateDesc").to_string(),
            linked_id: record.get("Linkedid").to_string(),
            caller_id_num: record.get("CallerIDNum").to_string(),
            connected_line_num: record.get("ConnectedLineNum").to_string(),
        }
    }
}

/// Manager events, decoded from raw records.
///
/// Anything the monitor does not act on decodes to [`ManagerEvent::Other`].
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// Periodic per-queue parameter report.
    QueueParams {
        queue: String,
        completed: u64,
        hold_time: u64,
        talk_time: u64,
        /// Service level percentage as reported (0–100).
        service_level_perf: f64,
    },
    /// One member line of a queue status listing.
    QueueMember {
        queue: String,
        member_name: String,
        in_call: bool,
    },
    /// A caller entered a queue.
    QueueCallerJoin {
        queue: String,
        call_id: String,
        caller_id_num: String,
        channel: String,
    },
    /// A caller left a queue (answered or abandoned).
    QueueCallerLeave { queue: String, call_id: String },
    /// A queue member was paused or unpaused.
    QueueMemberPause { member_name: String, paused: bool },
    /// Outbound leg started dialing.
    DialBegin(ChannelSignal),
    /// Channel state changed.
    Newstate(ChannelSignal),
    /// A channel joined a bridge (leg answered).
    BridgeEnter(ChannelSignal),
    /// A channel leg terminated.
    Hangup { channel: String, linked_id: String },
    /// Endpoint registration reachability changed.
    PeerStatus {
        peer: String,
        status: String,
        address: String,
    },
    /// Device state changed (also emitted by the device state listing).
    DeviceStateChange { device: String, state: String },
    /// Contact reachability, from live status events or the contact listing.
    ContactStatus {
        aor: String,
        uri: String,
        reachable: bool,
    },
    /// One live channel from a full channel enumeration.
    CoreShowChannel { linked_id: String, action_id: String },
    /// End marker of a full channel enumeration.
    CoreShowChannelsComplete { action_id: String },
    /// Any event type the monitor ignores.
    Other(String),
}

impl ManagerEvent {
    /// Decodes a record. Returns `None` when the record has no `Event` tag.
    pub fn decode(record: &EventRecord) -> Option<Self> {
        let tag = record.event_type()?;
        let text = |key: &str| record.get(key).to_string();

        let event = match tag {
            "QueueParams" => Self::QueueParams {
                queue: text("Queue"),
                completed: leading_u64(record.get("Completed")),
                hold_time: leading_u64(record.get("Holdtime")),
                talk_time: leading_u64(record.get("TalkTime")),
                service_level_perf: lenient_f64(record.get("ServicelevelPerf")),
            },
            "QueueMember" => Self::QueueMember {
                queue: text("Queue"),
                member_name: first_non_empty(record, &["MemberName", "Name"]),
                in_call: record.get("InCall") == "1",
            },
            "QueueCallerJoin" => Self::QueueCallerJoin {
                queue: text("Queue"),
                call_id: first_non_empty(record, &["Linkedid", "Uniqueid"]),
                caller_id_num: text("CallerIDNum"),
                channel: text("Channel"),
            },
            "QueueCallerLeave" => Self::QueueCallerLeave {
                queue: text("Queue"),
                call_id: first_non_empty(record, &["Linkedid", "Uniqueid"]),
            },
            "QueueMemberPause" => Self::QueueMemberPause {
                member_name: text("MemberName"),
                paused: record.get("Paused") == "1",
            },
            "DialBegin" => Self::DialBegin(ChannelSignal::from_record(record)),
            "Newstate" => Self::Newstate(ChannelSignal::from_record(record)),
            "BridgeEnter" => Self::BridgeEnter(ChannelSignal::from_record(record)),
            "Hangup" => Self::Hangup {
                channel: text("Channel"),
                linked_id: text("Linkedid"),
            },
            "PeerStatus" => Self::PeerStatus {
                peer: text("Peer"),
                status: text("PeerStatus"),
                address: text("Address"),
            },
            "DeviceStateChange" => Self::DeviceStateChange {
                device: text("Device"),
                state: text("State"),
            },
            "ContactStatus" => Self::ContactStatus {
                aor: text("AOR"),
                uri: text("URI"),
                reachable: record.get("ContactStatus") == "Reachable",
            },
            "ContactList" => Self::ContactStatus {
                aor: text("Aor"),
                uri: text("Uri"),
                reachable: record.get("Status") == "Reachable",
            },
            "CoreShowChannel" => Self::CoreShowChannel {
                linked_id: text("Linkedid"),
                action_id: text("ActionID"),
            },
            "CoreShowChannelsComplete" => Self::CoreShowChannelsComplete {
                action_id: text("ActionID"),
            },
            other => Self::Other(other.to_string()),
        };
        Some(event)
    }

    /// Events handled without tenant attribution: contact reachability feeds
    /// the process-wide address cache, and channel enumeration covers every
    /// tenant at once.
    pub fn is_tenant_independent(&self) -> bool {
        matches!(
            self,
            Self::ContactStatus { .. }
                | Self::CoreShowChannel { .. }
                | Self::CoreShowChannelsComplete { .. }
        )
    }
}

fn first_non_empty(record: &EventRecord, keys: &[&str]) -> String {
    keys.iter()
        .map(|key| record.get(key))
        .find(|value| !value.is_empty())
        .unwrap_or("")
        .to_string()
}

/// Parses the leading run of ASCII digits; anything else yields zero.
fn leading_u64(raw: &str) -> u64 {
    raw.trim()
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(u64::from(digit - b'0'))
        })
}

/// Parses the longest numeric prefix as a float; zero when there is none.
fn lenient_f64(raw: &str) -> f64 {
    let raw = raw.trim();
    let end = raw
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    raw[..end].parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> EventRecord {
        EventRecord::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn decodes_queue_params_with_lenient_numbers() {
        let event = ManagerEvent::decode(&record(&[
            ("Event", "QueueParams"),
            ("Queue", "support"),
            ("Completed", "42"),
            ("Holdtime", "17s"),
            ("TalkTime", "n/a"),
            ("ServicelevelPerf", "87.5"),
        ]))
        .unwrap();

        assert_eq!(
            event,
            ManagerEvent::QueueParams {
                queue: "support".into(),
                completed: 42,
                hold_time: 17,
                talk_time: 0,
                service_level_perf: 87.5,
            }
        );
    }

    #[test]
    fn caller_join_prefers_linkage_id() {
        let event = ManagerEvent::decode(&record(&[
            ("Event", "QueueCallerJoin"),
            ("Queue", "support"),
            ("Uniqueid", "1700.2"),
            ("Linkedid", "1700.1"),
            ("CallerIDNum", "5551234"),
            ("Channel", "PJSIP/trunk-00000001"),
        ]))
        .unwrap();
        match event {
            ManagerEvent::QueueCallerJoin { call_id, .. } => assert_eq!(call_id, "1700.1"),
            other => panic!("unexpected event: {other:?}"),
        }

        let event = ManagerEvent::decode(&record(&[
            ("Event", "QueueCallerLeave"),
            ("Queue", "support"),
            ("Uniqueid", "1700.2"),
        ]))
        .unwrap();
        assert_eq!(
            event,
            ManagerEvent::QueueCallerLeave {
                queue: "support".into(),
                call_id: "1700.2".into()
            }
        );
    }

    #[test]
    fn contact_list_and_contact_status_share_a_variant() {
        let live = ManagerEvent::decode(&record(&[
            ("Event", "ContactStatus"),
            ("AOR", "101"),
            ("URI", "sip:101@10.0.0.5:5060"),
            ("ContactStatus", "Reachable"),
        ]))
        .unwrap();
        let listed = ManagerEvent::decode(&record(&[
            ("Event", "ContactList"),
            ("Aor", "101"),
            ("Uri", "sip:101@10.0.0.5:5060"),
            ("Status", "Reachable"),
        ]))
        .unwrap();
        assert_eq!(live, listed);
        assert!(live.is_tenant_independent());
    }

    #[test]
    fn unknown_types_decode_to_other() {
        let event = ManagerEvent::decode(&record(&[("Event", "VarSet")])).unwrap();
        assert_eq!(event, ManagerEvent::Other("VarSet".into()));
        assert!(!event.is_tenant_independent());
    }

    #[test]
    fn record_without_event_does_not_decode() {
        assert!(ManagerEvent::decode(&record(&[("Response", "Success")])).is_none());
    }

    #[test]
    fn leading_digits_only() {
        assert_eq!(leading_u64("123abc"), 123);
        assert_eq!(leading_u64(""), 0);
        assert_eq!(leading_u64("-5"), 0);
        assert_eq!(lenient_f64("99.9%"), 99.9);
        assert_eq!(lenient_f64("abc"), 0.0);
    }
}
