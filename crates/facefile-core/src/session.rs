use crate::types::Identity;

/// Per-process capture session holding the pinned ("connected") identity.
///
/// While an identity is pinned, every save targets it without running the
/// matcher.
#[derive(Debug, Default, Clone)]
pub struct Session {
    pinned: Option<Identity>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `identity`. Pinning the same identity again is a no-op.
    pub fn pin(&mut self, identity: Identity) {
        if self.pinned != Some(identity) {
            tracing::info!(identity = %identity, "connected");
        }
        self.pinned = Some(identity);
    }

    /// Clear the pin, returning what was pinned.
    pub fn unpin(&mut self) -> Option<Identity> {
        let previous = self.pinned.take();
        if let Some(identity) = previous {
            tracing::info!(identity = %identity, "disconnected");
        }
        previous
    }

    pub fn current(&self) -> Option<Identity> {
        self.pinned
    }
}
