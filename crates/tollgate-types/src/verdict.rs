use crate::HeaderPairs;

/// Reserved directive key carrying a redirect target for 3xx verdicts.
pub const REDIRECT_DIRECTIVE: &str = "X-Sigsci-Redirect";

/// The agent's decision for one request, as returned by `RPC.PreRequest`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    /// Empty when the agent does not want to hear about the outcome.
    pub request_id: String,
    /// Raw response code: 200 allows, 300-599 blocks, anything else allows.
    pub waf_response: i64,
    /// Header directives the agent wants the application to see.
    pub request_headers: HeaderPairs,
}

/// What the lifecycle should do with a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictAction {
    /// Code 200.
    Allow,
    /// A code outside 200 and 300-599. Treated as allow.
    AllowUnknown(i64),
    /// Code in 300-599. `location` is only ever set for 300-399.
    Block {
        status: u16,
        location: Option<String>,
    },
}

impl Verdict {
    /// Classifies the verdict code.
    pub fn action(&self) -> VerdictAction {
        match self.waf_response {
            200 => VerdictAction::Allow,
            code @ 300..=599 => {
                // The range check keeps the cast lossless.
                let status = code as u16;
                let location = if code <= 399 {
                    self.redirect_location().map(str::to_string)
                } else {
                    None
                };
                VerdictAction::Block { status, location }
            }
            code => VerdictAction::AllowUnknown(code),
        }
    }

    /// Returns the first non-empty redirect directive, if any.
    pub fn redirect_location(&self) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(name, _)| name == REDIRECT_DIRECTIVE)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    /// Whether the agent asked to be told the outcome of this request.
    pub fn has_request_id(&self) -> bool {
        !self.request_id.is_empty()
    }
}
