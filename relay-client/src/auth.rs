//! Interactive sign-in: phone, code, and (when enabled) password.

use std::io::{self, BufRead, Write};

use relay_crypto::sha256;

use crate::errors::{ClientError, RpcError};
use crate::proto::{build, TlValue};
use crate::Client;

/// The server's "see other DC" status code.
const SEE_OTHER: i32 = 303;

/// Supplies the user-entered values the sign-in flow asks for.
///
/// The flow calls `phone_number`, then `code`, and only asks for `password`
/// when the account has one enabled.
pub trait AuthDataProvider: Send + Sync {
    /// The phone number, in international format.
    fn phone_number(&self) -> Result<String, ClientError>;
    /// The confirmation code the user received.
    fn code(&self) -> Result<String, ClientError>;
    /// The account password.
    fn password(&self) -> Result<String, ClientError>;
}

/// Prompts on stdin/stdout.
pub struct StdinAuthProvider;

impl StdinAuthProvider {
    fn prompt(label: &str) -> Result<String, ClientError> {
        print!("{label}");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

impl AuthDataProvider for StdinAuthProvider {
    fn phone_number(&self) -> Result<String, ClientError> {
        Self::prompt("Enter phone number: ")
    }

    fn code(&self) -> Result<String, ClientError> {
        Self::prompt("Enter code: ")
    }

    fn password(&self) -> Result<String, ClientError> {
        Self::prompt("Enter password: ")
    }
}

impl Client {
    /// Run the interactive sign-in flow.
    ///
    /// A `PHONE_MIGRATE_<n>` / `NETWORK_MIGRATE_<n>` answer moves the session
    /// to the named DC (re-running the key exchange there) and retries the
    /// code request. `SESSION_PASSWORD_NEEDED` appends the password step.
    pub async fn auth(&self, provider: &dyn AuthDataProvider) -> Result<(), ClientError> {
        let phone = provider.phone_number()?;

        let phone_code_hash = loop {
            match self.invoke(build::send_code(&self.inner.app, &phone)).await {
                Ok(TlValue::SentCode { phone_code_hash }) => break phone_code_hash,
                Ok(other) => {
                    return Err(ClientError::Unexpected(format!(
                        "sendCode answered with {:#010x}",
                        other.constructor_id()
                    )))
                }
                Err(ClientError::Rpc(e)) if e.code == SEE_OTHER => {
                    let dc = migrate_target(&e).ok_or(ClientError::Rpc(e))?;
                    log::info!("code request redirected to DC {dc}");
                    self.reconnect_to_dc(dc).await?;
                }
                Err(e) => return Err(e),
            }
        };

        let code = provider.code()?;
        let answer = match self.invoke(build::sign_in(&phone, &phone_code_hash, &code)).await {
            Ok(value) => value,
            Err(ClientError::Rpc(e)) if e.is("SESSION_PASSWORD_NEEDED") => {
                let salt = match self.invoke(build::get_password()).await? {
                    TlValue::PasswordInfo { current_salt } => current_salt,
                    other => {
                        return Err(ClientError::Unexpected(format!(
                            "getPassword answered with {:#010x}",
                            other.constructor_id()
                        )))
                    }
                };
                let password = provider.password()?;
                let hash = sha256!(&salt, password.as_bytes(), &salt);
                self.invoke(build::check_password(&hash)).await?
            }
            Err(e) => return Err(e),
        };

        match answer {
            TlValue::Authorization => {
                log::info!("signed in");
                Ok(())
            }
            other => Err(ClientError::Unexpected(format!(
                "sign-in answered with {:#010x}",
                other.constructor_id()
            ))),
        }
    }
}

/// Extract the DC id from a migration error.
fn migrate_target(error: &RpcError) -> Option<i32> {
    if error.is("PHONE_MIGRATE") || error.is("NETWORK_MIGRATE") {
        error.value.map(|v| v as i32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_errors_name_their_dc() {
        let e = RpcError::from_wire(303, "PHONE_MIGRATE_4");
        assert_eq!(migrate_target(&e), Some(4));
        let e = RpcError::from_wire(303, "NETWORK_MIGRATE_2");
        assert_eq!(migrate_target(&e), Some(2));
        let e = RpcError::from_wire(303, "FILE_MIGRATE_3");
        assert_eq!(migrate_target(&e), None);
    }

    #[test]
    fn password_hash_is_salt_wrapped() {
        let salt = b"salty";
        let expected = sha256!(salt, b"hunter2", salt);
        let actual = sha256!(&salt[..], "hunter2".as_bytes(), &salt[..]);
        assert_eq!(expected, actual);
    }
}
