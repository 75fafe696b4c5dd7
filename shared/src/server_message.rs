use crate::constants::FAIL_PREFIX;

/// A reply from the server or the agent. Any body starting with `FAIL` is an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Success(Vec<u8>),
    Fail(String),
}

impl Reply {
    pub fn fail(reason: impl std::fmt::Display) -> Self {
        Self::Fail(reason.to_string())
    }

    pub fn from_body(body: Vec<u8>) -> Self {
        if body.starts_with(FAIL_PREFIX) {
            let text = String::from_utf8_lossy(&body);
            let reason = text
                .strip_prefix("FAIL:")
                .or_else(|| text.strip_prefix("FAIL"))
                .unwrap_or(&text)
                .trim_start();
            Self::Fail(reason.to_string())
        } else {
            Self::Success(body)
        }
    }

    pub fn into_body(self) -> Vec<u8> {
        match self {
            Self::Success(body) => body,
            Self::Fail(reason) => format!("FAIL: {reason}").into_bytes(),
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_prefix_detection() {
        assert_eq!(
            Reply::from_body(b"FAIL: Wrong password".to_vec()),
            Reply::Fail("Wrong password".into())
        );
        assert_eq!(Reply::fail("Wrong password").into_body(), b"FAIL: Wrong password");
        assert_eq!(Reply::from_body(b"Title: mail\n".to_vec()), Reply::Success(b"Title: mail\n".to_vec()));
        assert!(Reply::from_body(b"FAILED".to_vec()).is_fail());
    }
}
