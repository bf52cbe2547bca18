//! Wire-level constants for the Hot Rod protocol.

/// Magic byte opening every request frame.
pub const REQUEST_MAGIC: u8 = 0xA0;
/// Magic byte opening every response frame.
pub const RESPONSE_MAGIC: u8 = 0xA1;
/// The protocol version byte this client speaks.
pub const PROTOCOL_VERSION: u8 = 30;

/// Topology id sent before the client has received any topology.
pub const INITIAL_TOPOLOGY_ID: i32 = -1;

// Request/response opcode pairs. A response opcode is always the request
// opcode plus one.

/// Put request opcode.
pub const PUT_REQUEST: u8 = 0x01;
/// Put response opcode.
pub const PUT_RESPONSE: u8 = 0x02;
/// Get request opcode.
pub const GET_REQUEST: u8 = 0x03;
/// Get response opcode.
pub const GET_RESPONSE: u8 = 0x04;
/// Put-if-absent request opcode.
pub const PUT_IF_ABSENT_REQUEST: u8 = 0x05;
/// Put-if-absent response opcode.
pub const PUT_IF_ABSENT_RESPONSE: u8 = 0x06;
/// Replace request opcode.
pub const REPLACE_REQUEST: u8 = 0x07;
/// Replace response opcode.
pub const REPLACE_RESPONSE: u8 = 0x08;
/// Versioned replace request opcode.
pub const REPLACE_IF_UNMODIFIED_REQUEST: u8 = 0x09;
/// Versioned replace response opcode.
pub const REPLACE_IF_UNMODIFIED_RESPONSE: u8 = 0x0A;
/// Remove request opcode.
pub const REMOVE_REQUEST: u8 = 0x0B;
/// Remove response opcode.
pub const REMOVE_RESPONSE: u8 = 0x0C;
/// Versioned remove request opcode.
pub const REMOVE_IF_UNMODIFIED_REQUEST: u8 = 0x0D;
/// Versioned remove response opcode.
pub const REMOVE_IF_UNMODIFIED_RESPONSE: u8 = 0x0E;
/// Contains-key request opcode.
pub const CONTAINS_KEY_REQUEST: u8 = 0x0F;
/// Contains-key response opcode.
pub const CONTAINS_KEY_RESPONSE: u8 = 0x10;
/// Clear request opcode.
pub const CLEAR_REQUEST: u8 = 0x13;
/// Clear response opcode.
pub const CLEAR_RESPONSE: u8 = 0x14;
/// Ping request opcode.
pub const PING_REQUEST: u8 = 0x17;
/// Ping response opcode.
pub const PING_RESPONSE: u8 = 0x18;
/// Get-with-metadata request opcode.
pub const GET_WITH_METADATA_REQUEST: u8 = 0x1B;
/// Get-with-metadata response opcode.
pub const GET_WITH_METADATA_RESPONSE: u8 = 0x1C;
/// Listener registration request opcode.
pub const ADD_CLIENT_LISTENER_REQUEST: u8 = 0x25;
/// Listener registration response opcode.
pub const ADD_CLIENT_LISTENER_RESPONSE: u8 = 0x26;
/// Listener removal request opcode.
pub const REMOVE_CLIENT_LISTENER_REQUEST: u8 = 0x27;
/// Listener removal response opcode.
pub const REMOVE_CLIENT_LISTENER_RESPONSE: u8 = 0x28;
/// Size request opcode.
pub const SIZE_REQUEST: u8 = 0x29;
/// Size response opcode.
pub const SIZE_RESPONSE: u8 = 0x2A;
/// Put-all request opcode.
pub const PUT_ALL_REQUEST: u8 = 0x2D;
/// Put-all response opcode.
pub const PUT_ALL_RESPONSE: u8 = 0x2E;
/// Get-all request opcode.
pub const GET_ALL_REQUEST: u8 = 0x2F;
/// Get-all response opcode.
pub const GET_ALL_RESPONSE: u8 = 0x30;
/// Iteration start request opcode.
pub const ITERATION_START_REQUEST: u8 = 0x31;
/// Iteration start response opcode.
pub const ITERATION_START_RESPONSE: u8 = 0x32;
/// Iteration next-batch request opcode.
pub const ITERATION_NEXT_REQUEST: u8 = 0x33;
/// Iteration next-batch response opcode.
pub const ITERATION_NEXT_RESPONSE: u8 = 0x34;
/// Iteration end request opcode.
pub const ITERATION_END_REQUEST: u8 = 0x35;
/// Iteration end response opcode.
pub const ITERATION_END_RESPONSE: u8 = 0x36;

/// Opcode of an error response. Error responses may answer any request.
pub const ERROR_RESPONSE: u8 = 0x50;

// Unsolicited event opcodes pushed on listener channels.

/// Entry-created event opcode.
pub const CACHE_ENTRY_CREATED_EVENT: u8 = 0x60;
/// Entry-modified event opcode.
pub const CACHE_ENTRY_MODIFIED_EVENT: u8 = 0x61;
/// Entry-removed event opcode.
pub const CACHE_ENTRY_REMOVED_EVENT: u8 = 0x62;
/// Entry-expired event opcode.
pub const CACHE_ENTRY_EXPIRED_EVENT: u8 = 0x63;

// Status bytes.

/// The request executed successfully.
pub const NO_ERROR: u8 = 0x00;
/// A conditional write did not execute (CAS mismatch, key present, ...).
pub const NOT_EXECUTED: u8 = 0x01;
/// The addressed key does not exist.
pub const KEY_DOES_NOT_EXIST: u8 = 0x02;
/// Success, with the previous value attached to the body.
pub const SUCCESS_WITH_PREVIOUS: u8 = 0x03;
/// Not executed, with the previous value attached to the body.
pub const NOT_EXECUTED_WITH_PREVIOUS: u8 = 0x04;
/// The iteration id is unknown or already closed.
pub const INVALID_ITERATION: u8 = 0x05;
/// The server could not match our magic or message id.
pub const INVALID_MAGIC_OR_MESSAGE_ID: u8 = 0x81;
/// The server does not recognize the opcode.
pub const UNKNOWN_COMMAND: u8 = 0x82;
/// The server does not speak our protocol version.
pub const UNKNOWN_VERSION: u8 = 0x83;
/// The server failed to parse the request frame.
pub const REQUEST_PARSING_ERROR: u8 = 0x84;
/// Generic server-side failure.
pub const SERVER_ERROR: u8 = 0x85;
/// The server timed the command out.
pub const COMMAND_TIMEOUT: u8 = 0x86;
/// An owning node is suspected failed; safe to retry elsewhere.
pub const NODE_SUSPECTED: u8 = 0x87;
/// The server is starting or stopping; safe to retry elsewhere.
pub const ILLEGAL_LIFECYCLE_STATE: u8 = 0x88;

// Per-call flag bits, joined into the header's flag varint.

/// Ask writes to return the previous value.
pub const FLAG_FORCE_RETURN_VALUE: u32 = 0x01;
/// Apply the server-configured default lifespan.
pub const FLAG_DEFAULT_LIFESPAN: u32 = 0x02;
/// Apply the server-configured default max idle.
pub const FLAG_DEFAULT_MAX_IDLE: u32 = 0x04;
/// Skip any configured cache loader on reads.
pub const FLAG_SKIP_CACHE_LOAD: u32 = 0x08;
/// Suppress listener notification for this write.
pub const FLAG_SKIP_LISTENER_NOTIFICATION: u32 = 0x10;

// Client intelligence levels announced in the request header.

/// No topology interest; the server sends no cluster views.
pub const INTELLIGENCE_BASIC: u8 = 0x01;
/// Receive member lists but no segment ownership table.
pub const INTELLIGENCE_TOPOLOGY_AWARE: u8 = 0x02;
/// Receive member lists and the segment ownership table.
pub const INTELLIGENCE_HASH_DISTRIBUTION_AWARE: u8 = 0x03;

// Expiration time-unit nibbles. SECONDS carries a varint duration field;
// the two sentinels suppress the field entirely.

/// Duration expressed in seconds.
pub const TIME_UNIT_SECONDS: u8 = 0x00;
/// Use the server-configured default duration.
pub const TIME_UNIT_DEFAULT: u8 = 0x07;
/// Never expire in this dimension.
pub const TIME_UNIT_INFINITE: u8 = 0x08;

/// Media-type descriptor for opaque byte payloads (no negotiation).
pub const MEDIA_TYPE_NONE: u8 = 0x00;

/// Returns `true` for a success-family status (the request executed and
/// had its intended effect).
pub fn is_success(status: u8) -> bool {
    status == NO_ERROR || status == SUCCESS_WITH_PREVIOUS
}

/// Returns `true` if the response body carries the previous value.
pub fn has_previous(status: u8) -> bool {
    status == SUCCESS_WITH_PREVIOUS || status == NOT_EXECUTED_WITH_PREVIOUS
}

/// Returns `true` for the not-executed family (conditional op lost).
pub fn is_not_executed(status: u8) -> bool {
    status == NOT_EXECUTED || status == NOT_EXECUTED_WITH_PREVIOUS
}

/// Returns `true` if `op` identifies an unsolicited cache event frame.
pub fn is_event_opcode(op: u8) -> bool {
    (CACHE_ENTRY_CREATED_EVENT..=CACHE_ENTRY_EXPIRED_EVENT).contains(&op)
}

/// Human-readable opcode names for log output.
pub fn opcode_name(op: u8) -> &'static str {
    match op {
        PUT_REQUEST => "PUT",
        GET_REQUEST => "GET",
        PUT_IF_ABSENT_REQUEST => "PUT_IF_ABSENT",
        REPLACE_REQUEST => "REPLACE",
        REPLACE_IF_UNMODIFIED_REQUEST => "REPLACE_IF_UNMODIFIED",
        REMOVE_REQUEST => "REMOVE",
        REMOVE_IF_UNMODIFIED_REQUEST => "REMOVE_IF_UNMODIFIED",
        CONTAINS_KEY_REQUEST => "CONTAINS_KEY",
        CLEAR_REQUEST => "CLEAR",
        PING_REQUEST => "PING",
        GET_WITH_METADATA_REQUEST => "GET_WITH_METADATA",
        ADD_CLIENT_LISTENER_REQUEST => "ADD_CLIENT_LISTENER",
        REMOVE_CLIENT_LISTENER_REQUEST => "REMOVE_CLIENT_LISTENER",
        SIZE_REQUEST => "SIZE",
        PUT_ALL_REQUEST => "PUT_ALL",
        GET_ALL_REQUEST => "GET_ALL",
        ITERATION_START_REQUEST => "ITERATION_START",
        ITERATION_NEXT_REQUEST => "ITERATION_NEXT",
        ITERATION_END_REQUEST => "ITERATION_END",
        ERROR_RESPONSE => "ERROR",
        CACHE_ENTRY_CREATED_EVENT => "CACHE_ENTRY_CREATED",
        CACHE_ENTRY_MODIFIED_EVENT => "CACHE_ENTRY_MODIFIED",
        CACHE_ENTRY_REMOVED_EVENT => "CACHE_ENTRY_REMOVED",
        CACHE_ENTRY_EXPIRED_EVENT => "CACHE_ENTRY_EXPIRED",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_opcode_is_request_plus_one() {
        assert_eq!(PUT_RESPONSE, PUT_REQUEST + 1);
        assert_eq!(GET_RESPONSE, GET_REQUEST + 1);
        assert_eq!(ITERATION_END_RESPONSE, ITERATION_END_REQUEST + 1);
    }

    #[test]
    fn test_status_classification() {
        assert!(is_success(NO_ERROR));
        assert!(is_success(SUCCESS_WITH_PREVIOUS));
        assert!(!is_success(NOT_EXECUTED));

        assert!(has_previous(SUCCESS_WITH_PREVIOUS));
        assert!(has_previous(NOT_EXECUTED_WITH_PREVIOUS));
        assert!(!has_previous(NO_ERROR));

        assert!(is_not_executed(NOT_EXECUTED));
        assert!(!is_not_executed(KEY_DOES_NOT_EXIST));
    }

    #[test]
    fn test_event_opcode_range() {
        assert!(is_event_opcode(CACHE_ENTRY_CREATED_EVENT));
        assert!(is_event_opcode(CACHE_ENTRY_EXPIRED_EVENT));
        assert!(!is_event_opcode(ERROR_RESPONSE));
        assert!(!is_event_opcode(GET_RESPONSE));
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(opcode_name(GET_REQUEST), "GET");
        assert_eq!(opcode_name(0x7F), "UNKNOWN");
    }
}
