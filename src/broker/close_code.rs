//! WebSocket close status codes (RFC 6455, section 7.4.1)

pub const NORMAL_CLOSURE: u16 = 1000;
pub const GOING_AWAY: u16 = 1001;
pub const PROTOCOL_ERROR: u16 = 1002;
pub const UNSUPPORTED_DATA: u16 = 1003;
pub const NO_STATUS_RECEIVED: u16 = 1005;
pub const ABNORMAL_CLOSURE: u16 = 1006;
pub const INVALID_FRAME_PAYLOAD_DATA: u16 = 1007;
pub const POLICY_VIOLATION: u16 = 1008;
pub const MESSAGE_TOO_BIG: u16 = 1009;
pub const MANDATORY_EXTENSION: u16 = 1010;
pub const INTERNAL_SERVER_ERROR: u16 = 1011;
pub const SERVICE_RESTART: u16 = 1012;
pub const TRY_AGAIN_LATER: u16 = 1013;
pub const TLS_HANDSHAKE: u16 = 1015;

/// Human-readable name of a close code, `"Unknown"` for codes outside the table
pub fn describe(code: u16) -> &'static str {
    match code {
        NORMAL_CLOSURE => "NormalClosure",
        GOING_AWAY => "GoingAway",
        PROTOCOL_ERROR => "ProtocolError",
        UNSUPPORTED_DATA => "UnsupportedData",
        NO_STATUS_RECEIVED => "NoStatusReceived",
        ABNORMAL_CLOSURE => "AbnormalClosure",
        INVALID_FRAME_PAYLOAD_DATA => "InvalidFramePayloadData",
        POLICY_VIOLATION => "PolicyViolation",
        MESSAGE_TOO_BIG => "MessageTooBig",
        MANDATORY_EXTENSION => "MandatoryExtension",
        INTERNAL_SERVER_ERROR => "InternalServerError",
        SERVICE_RESTART => "ServiceRestart",
        TRY_AGAIN_LATER => "TryAgainLater",
        TLS_HANDSHAKE => "TlsHandshake",
        _ => "Unknown",
    }
}
