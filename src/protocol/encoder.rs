//! Frontend message encoding.
//!
//! All encoders append onto a caller-supplied `BytesMut` so that one logical
//! message sequence (e.g. Bind + Execute + Close + Sync) is assembled in a
//! single buffer and flushed with a single write.

use bytes::{BufMut, BytesMut};

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196608;

/// SSLRequest code.
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// CancelRequest code.
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Frontend message builders. Stateless; every method writes one complete
/// framed message.
pub struct PgEncoder;

impl PgEncoder {
    fn put_cstr(buf: &mut BytesMut, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.put_u8(0);
    }

    /// StartupMessage: no tag byte, length + protocol version + key/value
    /// pairs terminated by a zero byte.
    pub fn startup_to(buf: &mut BytesMut, params: &[(&str, &str)]) {
        let body_len: usize = 4
            + 4
            + params
                .iter()
                .map(|(k, v)| k.len() + 1 + v.len() + 1)
                .sum::<usize>()
            + 1;
        buf.reserve(body_len);
        buf.put_i32(body_len as i32);
        buf.put_i32(PROTOCOL_VERSION);
        for (key, value) in params {
            Self::put_cstr(buf, key);
            Self::put_cstr(buf, value);
        }
        buf.put_u8(0);
    }

    /// SSLRequest: 8 bytes, no tag.
    pub fn ssl_request_to(buf: &mut BytesMut) {
        buf.put_i32(8);
        buf.put_i32(SSL_REQUEST_CODE);
    }

    /// CancelRequest: 16 bytes, no tag, sent on a dedicated transport.
    pub fn cancel_request_to(buf: &mut BytesMut, process_id: i32, secret_key: i32) {
        buf.put_i32(16);
        buf.put_i32(CANCEL_REQUEST_CODE);
        buf.put_i32(process_id);
        buf.put_i32(secret_key);
    }

    /// PasswordMessage ('p').
    pub fn password_to(buf: &mut BytesMut, password: &str) {
        buf.put_u8(b'p');
        buf.put_i32((4 + password.len() + 1) as i32);
        Self::put_cstr(buf, password);
    }

    /// Query ('Q'): the simple-query protocol.
    pub fn query_to(buf: &mut BytesMut, sql: &str) {
        buf.put_u8(b'Q');
        buf.put_i32((4 + sql.len() + 1) as i32);
        Self::put_cstr(buf, sql);
    }

    /// Parse ('P'): statement name, query, parameter OIDs.
    pub fn parse_to(buf: &mut BytesMut, name: &str, sql: &str, param_oids: &[u32]) {
        let body_len = name.len() + 1 + sql.len() + 1 + 2 + param_oids.len() * 4;
        buf.put_u8(b'P');
        buf.put_i32((4 + body_len) as i32);
        Self::put_cstr(buf, name);
        Self::put_cstr(buf, sql);
        buf.put_i16(param_oids.len() as i16);
        for &oid in param_oids {
            buf.put_u32(oid);
        }
    }

    /// Bind ('B'): portal, statement, per-parameter format codes and values,
    /// per-column result format codes.
    pub fn bind_to(
        buf: &mut BytesMut,
        portal: &str,
        statement: &str,
        param_formats: &[i16],
        params: &[Option<Vec<u8>>],
        result_formats: &[i16],
    ) {
        let values_len: usize = params
            .iter()
            .map(|p| 4 + p.as_ref().map_or(0, |v| v.len()))
            .sum();
        let body_len = portal.len()
            + 1
            + statement.len()
            + 1
            + 2
            + param_formats.len() * 2
            + 2
            + values_len
            + 2
            + result_formats.len() * 2;
        buf.reserve(1 + 4 + body_len);
        buf.put_u8(b'B');
        buf.put_i32((4 + body_len) as i32);
        Self::put_cstr(buf, portal);
        Self::put_cstr(buf, statement);
        buf.put_i16(param_formats.len() as i16);
        for &fc in param_formats {
            buf.put_i16(fc);
        }
        buf.put_i16(params.len() as i16);
        for param in params {
            match param {
                None => buf.put_i32(-1),
                Some(data) => {
                    buf.put_i32(data.len() as i32);
                    buf.extend_from_slice(data);
                }
            }
        }
        buf.put_i16(result_formats.len() as i16);
        for &fc in result_formats {
            buf.put_i16(fc);
        }
    }

    /// Describe ('D'): 'S' for a prepared statement, 'P' for a portal.
    pub fn describe_to(buf: &mut BytesMut, portal: bool, name: &str) {
        buf.put_u8(b'D');
        buf.put_i32((4 + 1 + name.len() + 1) as i32);
        buf.put_u8(if portal { b'P' } else { b'S' });
        Self::put_cstr(buf, name);
    }

    /// Execute ('E'): portal name plus row limit (0 = unlimited).
    pub fn execute_to(buf: &mut BytesMut, portal: &str, max_rows: i32) {
        buf.put_u8(b'E');
        buf.put_i32((4 + portal.len() + 1 + 4) as i32);
        Self::put_cstr(buf, portal);
        buf.put_i32(max_rows);
    }

    /// Close ('C'): 'S' for a prepared statement, 'P' for a portal.
    pub fn close_to(buf: &mut BytesMut, portal: bool, name: &str) {
        buf.put_u8(b'C');
        buf.put_i32((4 + 1 + name.len() + 1) as i32);
        buf.put_u8(if portal { b'P' } else { b'S' });
        Self::put_cstr(buf, name);
    }

    /// Sync ('S'): the sole resynchronization point.
    pub fn sync_to(buf: &mut BytesMut) {
        buf.extend_from_slice(&[b'S', 0, 0, 0, 4]);
    }

    /// Flush ('H').
    pub fn flush_to(buf: &mut BytesMut) {
        buf.extend_from_slice(&[b'H', 0, 0, 0, 4]);
    }

    /// Terminate ('X').
    pub fn terminate_to(buf: &mut BytesMut) {
        buf.extend_from_slice(&[b'X', 0, 0, 0, 4]);
    }

    /// CopyFail ('f'): refuses a CopyInResponse so the exchange cannot
    /// deadlock.
    pub fn copy_fail_to(buf: &mut BytesMut, reason: &str) {
        buf.put_u8(b'f');
        buf.put_i32((4 + reason.len() + 1) as i32);
        Self::put_cstr(buf, reason);
    }
}
