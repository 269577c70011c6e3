//! Typed header names for event documents.

/// Error returned when parsing an unrecognized header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHeaderNameError(pub String);

impl std::fmt::Display for ParseHeaderNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown header name: {}", self.0)
    }
}

impl std::error::Error for ParseHeaderNameError {}

define_header_enum! {
    error_type: ParseHeaderNameError,
    /// Header names that appear in parsed event documents.
    ///
    /// These are the headers on the document itself (not protocol framing
    /// headers like `Content-Type`). Use with [`EventDocument::header()`]
    /// for type-safe lookups.
    ///
    /// [`EventDocument::header()`]: crate::EventDocument::header
    pub enum HeaderName {
        EventName => "Event-Name",
        EventSubclass => "Event-Subclass",
        SpeechType => "Speech-Type",
        UniqueId => "Unique-ID",
        JobUuid => "Job-UUID",
        ContentLength => "Content-Length",
        ChannelName => "Channel-Name",
        AnswerState => "Answer-State",
        HangupCause => "Hangup-Cause",
        CallerCallerIdName => "Caller-Caller-ID-Name",
        CallerCallerIdNumber => "Caller-Caller-ID-Number",
        CallerDestinationNumber => "Caller-Destination-Number",
        ConferenceName => "Conference-Name",
        ConferenceSize => "Conference-Size",
        MemberId => "Member-ID",
    }
}
