//! PostgreSQL wire protocol backend messages.
//!
//! Every backend message carries a one-byte ASCII tag followed by a 32-bit
//! big-endian length that includes the length field but not the tag.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use crate::error::ServerError;

/// Transaction status reported by `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// 'I' - idle, not in a transaction block.
    Idle,
    /// 'T' - inside a transaction block.
    InTransaction,
    /// 'E' - inside a failed transaction block; only rollback will work.
    Failed,
}

/// One column of a `RowDescription`.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub type_oid: u32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: i16,
}

/// Authentication request subtypes the driver understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    /// Kerberos, crypt, SCM, GSSAPI, SSPI, SASL - all rejected.
    Unsupported(i32),
}

/// Backend (server -> client) messages.
#[derive(Debug, Clone)]
pub enum BackendMessage {
    Authentication(AuthRequest),
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery(TransactionStatus),
    RowDescription(Vec<FieldDescription>),
    ParameterDescription(Vec<u32>),
    DataRow(Vec<Option<Vec<u8>>>),
    CommandComplete(String),
    EmptyQueryResponse,
    ErrorResponse(ServerError),
    NoticeResponse(ServerError),
    ParseComplete,
    BindComplete,
    CloseComplete,
    PortalSuspended,
    NoData,
    NotificationResponse { process_id: i32, channel: String, payload: String },
    /// COPY hooks; kept only so the dispatch loops cannot deadlock.
    CopyInResponse,
    CopyOutResponse,
    CopyData(Vec<u8>),
    CopyDone,
}

impl BackendMessage {
    /// Decode a single framed message from its tag and payload (the bytes
    /// after the length field).
    pub fn decode(tag: u8, payload: &[u8]) -> Result<Self, String> {
        match tag {
            b'R' => decode_auth(payload),
            b'S' => decode_parameter_status(payload),
            b'K' => decode_backend_key(payload),
            b'Z' => decode_ready_for_query(payload),
            b'T' => decode_row_description(payload),
            b't' => decode_parameter_description(payload),
            b'D' => decode_data_row(payload),
            b'C' => decode_command_complete(payload),
            b'I' => Ok(BackendMessage::EmptyQueryResponse),
            b'E' => Ok(BackendMessage::ErrorResponse(parse_error_fields(payload))),
            b'N' => Ok(BackendMessage::NoticeResponse(parse_error_fields(payload))),
            b'1' => Ok(BackendMessage::ParseComplete),
            b'2' => Ok(BackendMessage::BindComplete),
            b'3' => Ok(BackendMessage::CloseComplete),
            b's' => Ok(BackendMessage::PortalSuspended),
            b'n' => Ok(BackendMessage::NoData),
            b'A' => decode_notification(payload),
            b'G' => Ok(BackendMessage::CopyInResponse),
            b'H' => Ok(BackendMessage::CopyOutResponse),
            b'd' => Ok(BackendMessage::CopyData(payload.to_vec())),
            b'c' => Ok(BackendMessage::CopyDone),
            _ => Err(format!("unknown backend message tag 0x{:02x}", tag)),
        }
    }

    /// The tag character, for trace logging.
    pub fn tag(&self) -> char {
        match self {
            BackendMessage::Authentication(_) => 'R',
            BackendMessage::ParameterStatus { .. } => 'S',
            BackendMessage::BackendKeyData { .. } => 'K',
            BackendMessage::ReadyForQuery(_) => 'Z',
            BackendMessage::RowDescription(_) => 'T',
            BackendMessage::ParameterDescription(_) => 't',
            BackendMessage::DataRow(_) => 'D',
            BackendMessage::CommandComplete(_) => 'C',
            BackendMessage::EmptyQueryResponse => 'I',
            BackendMessage::ErrorResponse(_) => 'E',
            BackendMessage::NoticeResponse(_) => 'N',
            BackendMessage::ParseComplete => '1',
            BackendMessage::BindComplete => '2',
            BackendMessage::CloseComplete => '3',
            BackendMessage::PortalSuspended => 's',
            BackendMessage::NoData => 'n',
            BackendMessage::NotificationResponse { .. } => 'A',
            BackendMessage::CopyInResponse => 'G',
            BackendMessage::CopyOutResponse => 'H',
            BackendMessage::CopyData(_) => 'd',
            BackendMessage::CopyDone => 'c',
        }
    }
}

fn read_i16(payload: &[u8], pos: usize) -> Result<i16, String> {
    payload
        .get(pos..pos + 2)
        .map(|b| i16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| "message truncated".to_string())
}

fn read_i32(payload: &[u8], pos: usize) -> Result<i32, String> {
    payload
        .get(pos..pos + 4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| "message truncated".to_string())
}

fn read_u32(payload: &[u8], pos: usize) -> Result<u32, String> {
    read_i32(payload, pos).map(|v| v as u32)
}

/// Read a null-terminated UTF-8 string starting at `pos`; returns the string
/// and the position just past the terminator.
fn read_cstr(payload: &[u8], pos: usize) -> Result<(String, usize), String> {
    let rest = payload.get(pos..).ok_or("message truncated")?;
    let end = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or("missing null terminator")?;
    let s = std::str::from_utf8(&rest[..end])
        .map_err(|e| format!("invalid UTF-8 in string: {}", e))?
        .to_string();
    Ok((s, pos + end + 1))
}

fn decode_auth(payload: &[u8]) -> Result<BackendMessage, String> {
    let code = read_i32(payload, 0)?;
    let req = match code {
        0 => AuthRequest::Ok,
        3 => AuthRequest::CleartextPassword,
        5 => {
            let salt: [u8; 4] = payload
                .get(4..8)
                .and_then(|b| b.try_into().ok())
                .ok_or("MD5 authentication request missing salt")?;
            AuthRequest::Md5Password { salt }
        }
        other => AuthRequest::Unsupported(other),
    };
    Ok(BackendMessage::Authentication(req))
}

fn decode_parameter_status(payload: &[u8]) -> Result<BackendMessage, String> {
    let (name, pos) = read_cstr(payload, 0)?;
    let (value, _) = read_cstr(payload, pos)?;
    Ok(BackendMessage::ParameterStatus { name, value })
}

fn decode_backend_key(payload: &[u8]) -> Result<BackendMessage, String> {
    Ok(BackendMessage::BackendKeyData {
        process_id: read_i32(payload, 0)?,
        secret_key: read_i32(payload, 4)?,
    })
}

fn decode_ready_for_query(payload: &[u8]) -> Result<BackendMessage, String> {
    let status = match payload.first() {
        Some(b'I') => TransactionStatus::Idle,
        Some(b'T') => TransactionStatus::InTransaction,
        Some(b'E') => TransactionStatus::Failed,
        other => return Err(format!("unknown transaction status {:?}", other)),
    };
    Ok(BackendMessage::ReadyForQuery(status))
}

fn decode_row_description(payload: &[u8]) -> Result<BackendMessage, String> {
    let count = read_i16(payload, 0)? as usize;
    let mut fields = Vec::with_capacity(count);
    let mut pos = 2;
    for _ in 0..count {
        let (name, next) = read_cstr(payload, pos)?;
        pos = next;
        let table_oid = read_u32(payload, pos)?;
        let column_attr = read_i16(payload, pos + 4)?;
        let type_oid = read_u32(payload, pos + 6)?;
        let type_size = read_i16(payload, pos + 10)?;
        let type_modifier = read_i32(payload, pos + 12)?;
        let format = read_i16(payload, pos + 16)?;
        pos += 18;
        fields.push(FieldDescription {
            name,
            table_oid,
            column_attr,
            type_oid,
            type_size,
            type_modifier,
            format,
        });
    }
    Ok(BackendMessage::RowDescription(fields))
}

fn decode_parameter_description(payload: &[u8]) -> Result<BackendMessage, String> {
    let count = read_i16(payload, 0)? as usize;
    let mut oids = Vec::with_capacity(count);
    for i in 0..count {
        oids.push(read_u32(payload, 2 + i * 4)?);
    }
    Ok(BackendMessage::ParameterDescription(oids))
}

fn decode_data_row(payload: &[u8]) -> Result<BackendMessage, String> {
    let count = read_i16(payload, 0)? as usize;
    let mut columns = Vec::with_capacity(count);
    let mut pos = 2;
    for _ in 0..count {
        let len = read_i32(payload, pos)?;
        pos += 4;
        if len == -1 {
            columns.push(None);
        } else {
            let len = len as usize;
            let data = payload
                .get(pos..pos + len)
                .ok_or("DataRow column truncated")?;
            columns.push(Some(data.to_vec()));
            pos += len;
        }
    }
    Ok(BackendMessage::DataRow(columns))
}

fn decode_command_complete(payload: &[u8]) -> Result<BackendMessage, String> {
    let (tag, _) = read_cstr(payload, 0)?;
    Ok(BackendMessage::CommandComplete(tag))
}

fn decode_notification(payload: &[u8]) -> Result<BackendMessage, String> {
    let process_id = read_i32(payload, 0)?;
    let (channel, pos) = read_cstr(payload, 4)?;
    let (notify_payload, _) = read_cstr(payload, pos)?;
    Ok(BackendMessage::NotificationResponse {
        process_id,
        channel,
        payload: notify_payload,
    })
}

/// Parse the field list shared by `ErrorResponse` and `NoticeResponse`.
///
/// Each field is a one-byte code followed by a null-terminated value; a zero
/// byte terminates the list. Unknown codes are skipped.
fn parse_error_fields(payload: &[u8]) -> ServerError {
    let mut fields = ServerError::default();
    let mut pos = 0;
    while let Some(&code) = payload.get(pos) {
        if code == 0 {
            break;
        }
        pos += 1;
        let (value, next) = match read_cstr(payload, pos) {
            Ok(v) => v,
            Err(_) => break,
        };
        pos = next;
        match code {
            b'S' => fields.severity = value,
            b'C' => fields.code = value,
            b'M' => fields.message = value,
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            b'P' => fields.position = Some(value),
            b'p' => fields.internal_position = Some(value),
            b'q' => fields.internal_query = Some(value),
            b'W' => fields.where_ = Some(value),
            b's' => fields.schema_name = Some(value),
            b't' => fields.table_name = Some(value),
            b'c' => fields.column_name = Some(value),
            b'd' => fields.datatype_name = Some(value),
            b'n' => fields.constraint_name = Some(value),
            b'F' => fields.file = Some(value),
            b'L' => fields.line = Some(value),
            b'R' => fields.routine = Some(value),
            _ => {}
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ready_for_query() {
        let msg = BackendMessage::decode(b'Z', b"I").unwrap();
        assert!(matches!(
            msg,
            BackendMessage::ReadyForQuery(TransactionStatus::Idle)
        ));
        let msg = BackendMessage::decode(b'Z', b"E").unwrap();
        assert!(matches!(
            msg,
            BackendMessage::ReadyForQuery(TransactionStatus::Failed)
        ));
        assert!(BackendMessage::decode(b'Z', b"X").is_err());
    }

    #[test]
    fn test_decode_auth_variants() {
        let msg = BackendMessage::decode(b'R', &0i32.to_be_bytes()).unwrap();
        assert!(matches!(msg, BackendMessage::Authentication(AuthRequest::Ok)));

        let mut md5 = 5i32.to_be_bytes().to_vec();
        md5.extend_from_slice(&[1, 2, 3, 4]);
        let msg = BackendMessage::decode(b'R', &md5).unwrap();
        assert!(matches!(
            msg,
            BackendMessage::Authentication(AuthRequest::Md5Password { salt: [1, 2, 3, 4] })
        ));

        // SASL is reported as unsupported, not a decode failure.
        let msg = BackendMessage::decode(b'R', &10i32.to_be_bytes()).unwrap();
        assert!(matches!(
            msg,
            BackendMessage::Authentication(AuthRequest::Unsupported(10))
        ));
    }

    #[test]
    fn test_decode_parameter_status() {
        let msg = BackendMessage::decode(b'S', b"integer_datetimes\0on\0").unwrap();
        match msg {
            BackendMessage::ParameterStatus { name, value } => {
                assert_eq!(name, "integer_datetimes");
                assert_eq!(value, "on");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_backend_key_data() {
        let mut payload = 4321i32.to_be_bytes().to_vec();
        payload.extend_from_slice(&99i32.to_be_bytes());
        let msg = BackendMessage::decode(b'K', &payload).unwrap();
        match msg {
            BackendMessage::BackendKeyData { process_id, secret_key } => {
                assert_eq!(process_id, 4321);
                assert_eq!(secret_key, 99);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_row_description() {
        // Two columns: "id" int4, "name" varchar.
        let mut payload = 2i16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"id\0");
        payload.extend_from_slice(&16384u32.to_be_bytes());
        payload.extend_from_slice(&1i16.to_be_bytes());
        payload.extend_from_slice(&23u32.to_be_bytes());
        payload.extend_from_slice(&4i16.to_be_bytes());
        payload.extend_from_slice(&(-1i32).to_be_bytes());
        payload.extend_from_slice(&0i16.to_be_bytes());
        payload.extend_from_slice(b"name\0");
        payload.extend_from_slice(&16384u32.to_be_bytes());
        payload.extend_from_slice(&2i16.to_be_bytes());
        payload.extend_from_slice(&1043u32.to_be_bytes());
        payload.extend_from_slice(&(-1i16).to_be_bytes());
        payload.extend_from_slice(&84i32.to_be_bytes());
        payload.extend_from_slice(&0i16.to_be_bytes());

        let msg = BackendMessage::decode(b'T', &payload).unwrap();
        match msg {
            BackendMessage::RowDescription(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].name, "id");
                assert_eq!(fields[0].type_oid, 23);
                assert_eq!(fields[1].name, "name");
                assert_eq!(fields[1].type_oid, 1043);
                assert_eq!(fields[1].type_modifier, 84);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_data_row_with_null() {
        let mut payload = 3i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&1i32.to_be_bytes());
        payload.push(b'7');
        payload.extend_from_slice(&(-1i32).to_be_bytes());
        payload.extend_from_slice(&2i32.to_be_bytes());
        payload.extend_from_slice(b"ok");

        let msg = BackendMessage::decode(b'D', &payload).unwrap();
        match msg {
            BackendMessage::DataRow(cols) => {
                assert_eq!(cols.len(), 3);
                assert_eq!(cols[0].as_deref(), Some(&b"7"[..]));
                assert!(cols[1].is_none());
                assert_eq!(cols[2].as_deref(), Some(&b"ok"[..]));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_response_fields() {
        let payload = b"SERROR\0C22012\0Mdivision by zero\0Fint.c\0L841\0Rint4div\0\0";
        let msg = BackendMessage::decode(b'E', payload).unwrap();
        match msg {
            BackendMessage::ErrorResponse(e) => {
                assert_eq!(e.severity, "ERROR");
                assert_eq!(e.code, "22012");
                assert_eq!(e.message, "division by zero");
                assert_eq!(e.file.as_deref(), Some("int.c"));
                assert_eq!(e.line.as_deref(), Some("841"));
                assert_eq!(e.routine.as_deref(), Some("int4div"));
                assert!(e.detail.is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_parameter_description() {
        let mut payload = 2i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&23u32.to_be_bytes());
        payload.extend_from_slice(&25u32.to_be_bytes());
        let msg = BackendMessage::decode(b't', &payload).unwrap();
        match msg {
            BackendMessage::ParameterDescription(oids) => assert_eq!(oids, vec![23, 25]),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification() {
        let mut payload = 777i32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"jobs\0payload text\0");
        let msg = BackendMessage::decode(b'A', &payload).unwrap();
        match msg {
            BackendMessage::NotificationResponse { process_id, channel, payload } => {
                assert_eq!(process_id, 777);
                assert_eq!(channel, "jobs");
                assert_eq!(payload, "payload text");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        assert!(BackendMessage::decode(b'@', b"").is_err());
    }
}
