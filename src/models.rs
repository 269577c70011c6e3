//! Typed parsers for specific command outputs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Number of semicolon-delimited fields in a conference member record.
const MEMBER_FIELD_COUNT: usize = 9;

/// Return the segment after the last `/` of an endpoint URI.
///
/// `sofia/internal/1000@example.com` shortens to `1000@example.com`;
/// a string with no `/` is returned unchanged.
pub fn short_uri(uri: &str) -> &str {
    match uri.rfind('/') {
        Some(idx) => &uri[idx + 1..],
        None => uri,
    }
}

/// One row of a `conference <name> list` response.
///
/// The switch emits nine semicolon-delimited fields per member:
/// `id;uri;uuid;caller name;caller number;flags;volume in;volume out;energy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceMember {
    /// Member id, unique within the conference.
    pub id: String,
    /// Channel endpoint URI, e.g. `sofia/internal/1000@example.com`.
    pub uri: String,
    /// Session UUID of the member's channel.
    pub uuid: String,
    /// Caller ID name.
    pub caller_name: String,
    /// Caller ID number.
    pub caller_number: String,
    /// `|`-separated member flags, e.g. `hear|speak|floor`.
    pub flags: String,
    /// Inbound volume adjustment.
    pub volume_in: i32,
    /// Outbound volume adjustment.
    pub volume_out: i32,
    /// Energy (noise gate) threshold.
    pub energy: i32,
}

impl ConferenceMember {
    /// Parse one listing line.
    ///
    /// Fails with [`Error::MalformedRecord`] unless exactly nine fields are
    /// present and the volume/energy fields are integers.
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() != MEMBER_FIELD_COUNT {
            return Err(Error::MalformedRecord {
                detail: format!(
                    "expected {} fields, got {} in {:?}",
                    MEMBER_FIELD_COUNT,
                    fields.len(),
                    line
                ),
            });
        }

        let numeric = |value: &str, name: &str| -> Result<i32> {
            value.trim().parse().map_err(|_| Error::MalformedRecord {
                detail: format!("non-numeric {} field {:?} in {:?}", name, value, line),
            })
        };

        Ok(Self {
            id: fields[0].to_string(),
            uri: fields[1].to_string(),
            uuid: fields[2].to_string(),
            caller_name: fields[3].to_string(),
            caller_number: fields[4].to_string(),
            flags: fields[5].to_string(),
            volume_in: numeric(fields[6], "volume-in")?,
            volume_out: numeric(fields[7], "volume-out")?,
            energy: numeric(fields[8], "energy")?,
        })
    }

    /// The member URI with its endpoint/profile prefix stripped.
    pub fn short_uri(&self) -> &str {
        short_uri(&self.uri)
    }

    /// Whether the member carries the given flag (e.g. `"speak"`).
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.split('|').any(|f| f == flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nine_field_record() {
        let member =
            ConferenceMember::parse("1;sofia/d.com/u@b.com;uuid1;FS;000;hear|speak;0;0;300")
                .unwrap();
        assert_eq!(member.id, "1");
        assert_eq!(member.uri, "sofia/d.com/u@b.com");
        assert_eq!(member.uuid, "uuid1");
        assert_eq!(member.caller_name, "FS");
        assert_eq!(member.caller_number, "000");
        assert_eq!(member.flags, "hear|speak");
        assert_eq!(member.volume_in, 0);
        assert_eq!(member.volume_out, 0);
        assert_eq!(member.energy, 300);
    }

    #[test]
    fn short_uri_strips_prefix() {
        let member =
            ConferenceMember::parse("1;sofia/d.com/u@b.com;uuid1;FS;000;hear|speak;0;0;300")
                .unwrap();
        assert_eq!(member.short_uri(), "u@b.com");
    }

    #[test]
    fn short_uri_without_slash_unchanged() {
        assert_eq!(short_uri("loopback-a"), "loopback-a");
        assert_eq!(short_uri(""), "");
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        let err = ConferenceMember::parse("1;only;four;fields").unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { .. }));
    }

    #[test]
    fn non_numeric_volume_is_malformed() {
        let err =
            ConferenceMember::parse("1;uri;uuid;name;num;hear;loud;0;300").unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { .. }));
    }

    #[test]
    fn flags_membership() {
        let member =
            ConferenceMember::parse("3;sofia/ext/9@x;u3;Bob;9;hear|speak|floor;0;-4;300").unwrap();
        assert!(member.has_flag("floor"));
        assert!(member.has_flag("hear"));
        assert!(!member.has_flag("talking"));
        assert_eq!(member.volume_out, -4);
    }
}
