use crate::core::domain::value_object::{ApiTicket, CsrfToken};

/// Authentication state held for one node: the ticket plus the CSRF token
/// that must accompany every write.
#[derive(Debug, Clone)]
pub struct ApiSession {
    ticket: ApiTicket,
    csrf_token: Option<CsrfToken>,
}

impl ApiSession {
    pub fn new(ticket: ApiTicket, csrf_token: Option<CsrfToken>) -> Self {
        Self { ticket, csrf_token }
    }

    pub fn ticket(&self) -> &ApiTicket {
        &self.ticket
    }

    pub fn csrf_token(&self) -> Option<&CsrfToken> {
        self.csrf_token.as_ref()
    }
}
