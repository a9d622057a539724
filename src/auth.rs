use rand::RngCore;
use rouille::input;
use rouille::Request;
use rouille::Response;
use sha2::{Digest, Sha256};

const REALM: &str = "Wake-on-LAN";
const CSRF_TOKEN_BYTES: usize = 32;

/// 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    let mut buf = [0u8; CSRF_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

// Comparing digests keeps the comparison time independent of how long a
// prefix of the secret the caller guessed.
pub fn secrets_match(expected: &str, given: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(given.as_bytes())
}

/// HTTP basic auth gate. Only active when both a user and a password are set.
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn from_config(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Self { username, password })
            }
            _ => None,
        }
    }

    pub fn is_authorized(&self, request: &Request) -> bool {
        match input::basic_http_auth(request) {
            Some(creds) => {
                // Both are always compared.
                let user_ok = secrets_match(&self.username, &creds.login);
                let password_ok = secrets_match(&self.password, &creds.password);
                user_ok && password_ok
            }
            None => false,
        }
    }
}

pub fn login_required() -> Response {
    Response::text("Authentication required.")
        .with_status_code(401)
        .with_additional_header("WWW-Authenticate", format!("Basic realm=\"{}\"", REALM))
}
