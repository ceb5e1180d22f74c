/// Per-request credentials handed explicitly to every repository call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub token: String,
}

impl RequestContext {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}
