//! Authentication responses.
//!
//! Dispatches on the Authentication* subtype: cleartext and MD5-salted
//! passwords are answered, everything else (kerberos, crypt, SCM, GSSAPI,
//! SSPI, SASL) is rejected.

use bytes::BytesMut;

use super::encoder::PgEncoder;
use super::wire::AuthRequest;
use crate::error::{PgError, PgResult};

/// Build the MD5 password response: `"md5" + hex(md5(hex(md5(password ‖ user)) ‖ salt))`.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = format!("{:x}", md5::compute(format!("{}{}", password, user)));
    let mut salted = inner.into_bytes();
    salted.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(salted))
}

/// Append the response to an authentication request onto `buf`, or fail for
/// methods the driver does not speak. `AuthRequest::Ok` writes nothing.
pub fn respond(
    buf: &mut BytesMut,
    request: &AuthRequest,
    user: &str,
    password: Option<&str>,
) -> PgResult<()> {
    match request {
        AuthRequest::Ok => Ok(()),
        AuthRequest::CleartextPassword => {
            let password = password.ok_or_else(|| {
                PgError::Interface(
                    "server requested cleartext password authentication, but no password was provided"
                        .to_string(),
                )
            })?;
            PgEncoder::password_to(buf, password);
            Ok(())
        }
        AuthRequest::Md5Password { salt } => {
            let password = password.ok_or_else(|| {
                PgError::Interface(
                    "server requested MD5 password authentication, but no password was provided"
                        .to_string(),
                )
            })?;
            PgEncoder::password_to(buf, &md5_password(user, password, *salt));
            Ok(())
        }
        AuthRequest::Unsupported(code) => Err(PgError::Auth(format!(
            "authentication method {} not supported",
            code
        ))),
    }
}
