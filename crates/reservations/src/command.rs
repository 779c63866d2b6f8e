//! Inputs to the reservation engine.

use common::{ReservationId, SessionId, StockTarget, TenantId};

/// Command to hold units of one stock-keeping unit for a checkout session.
#[derive(Debug, Clone)]
pub struct ReserveStock {
    pub tenant_id: TenantId,
    pub target: StockTarget,
    pub quantity: u32,
    pub session_id: SessionId,
    /// Hold duration; the engine default applies when None.
    pub expiration_minutes: Option<u32>,
}

impl ReserveStock {
    /// Creates a reserve command using the default hold duration.
    pub fn new(
        tenant_id: TenantId,
        target: StockTarget,
        quantity: u32,
        session_id: impl Into<SessionId>,
    ) -> Self {
        Self {
            tenant_id,
            target,
            quantity,
            session_id: session_id.into(),
            expiration_minutes: None,
        }
    }

    /// Overrides the hold duration.
    pub fn expires_in_minutes(mut self, minutes: u32) -> Self {
        self.expiration_minutes = Some(minutes);
        self
    }
}

/// What a payment confirmation resolves: one hold or a whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionTarget {
    Reservation(ReservationId),
    Session(SessionId),
}

impl From<ReservationId> for CompletionTarget {
    fn from(id: ReservationId) -> Self {
        CompletionTarget::Reservation(id)
    }
}

impl From<SessionId> for CompletionTarget {
    fn from(id: SessionId) -> Self {
        CompletionTarget::Session(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_command_builder() {
        let tenant_id = TenantId::new();
        let cmd = ReserveStock::new(tenant_id, StockTarget::product("SKU-001"), 2, "cs_1");
        assert_eq!(cmd.session_id, SessionId::new("cs_1"));
        assert!(cmd.expiration_minutes.is_none());

        let cmd = cmd.expires_in_minutes(30);
        assert_eq!(cmd.expiration_minutes, Some(30));
    }

    #[test]
    fn completion_target_conversions() {
        let id = ReservationId::new();
        assert_eq!(
            CompletionTarget::from(id),
            CompletionTarget::Reservation(id)
        );
        assert_eq!(
            CompletionTarget::from(SessionId::new("cs_1")),
            CompletionTarget::Session(SessionId::new("cs_1"))
        );
    }
}
