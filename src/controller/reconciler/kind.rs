//! # Dynamic Kind Resolver
//!
//! The InstanceClass kind is declared by the cloud provider secret and may
//! change at runtime. The resolver owns the single "subscribed kind" cell and
//! turns a mismatch between declared and subscribed kind into a
//! [`BindingAction`] for the watch loop, which rebinds the InstanceClass
//! watcher. A pass that produced an action stops early; the watcher's initial
//! listing of the new kind triggers the next, complete pass.

use crate::crd::InstanceClassKind;
use std::fmt;
use tokio::sync::watch;

/// Re-subscription command for the InstanceClass watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingAction {
    /// Start watching a kind, nothing was subscribed before
    Enable(InstanceClassKind),
    /// Switch the watcher to another kind
    UpdateKind(InstanceClassKind),
    /// Stop watching the previously subscribed kind
    Disable(String),
}

impl BindingAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingAction::Enable(_) => "enable",
            BindingAction::UpdateKind(_) => "update-kind",
            BindingAction::Disable(_) => "disable",
        }
    }
}

impl fmt::Display for BindingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingAction::Enable(k) => write!(f, "Enable({}, apiVersion={})", k.kind, k.api_version()),
            BindingAction::UpdateKind(k) => write!(f, "UpdateKind({})", k.kind),
            BindingAction::Disable(kind) => write!(f, "Disable({kind})"),
        }
    }
}

/// Owner of the subscribed InstanceClass kind
///
/// Backed by a `watch` channel so the watch loop can follow the subscription
/// without sharing any other state with the reconciler.
#[derive(Debug)]
pub struct KindResolver {
    subscribed: watch::Sender<Option<InstanceClassKind>>,
}

impl Default for KindResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl KindResolver {
    #[must_use]
    pub fn new() -> Self {
        let (subscribed, _) = watch::channel(None);
        Self { subscribed }
    }

    /// Follow subscription changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<InstanceClassKind>> {
        self.subscribed.subscribe()
    }

    /// Currently subscribed kind
    #[must_use]
    pub fn subscribed(&self) -> Option<InstanceClassKind> {
        self.subscribed.borrow().clone()
    }

    /// Reconcile the declared kind with the subscribed one
    ///
    /// Returns `Some(action)` when the subscription changed, in which case the
    /// caller must abort the pass. `None` means declared and subscribed agree.
    pub fn resolve(&self, declared: &str) -> Option<BindingAction> {
        let declared = declared.trim();
        let current = self.subscribed();

        let action = match (declared.is_empty(), current) {
            (true, None) => None,
            (true, Some(old)) => Some(BindingAction::Disable(old.kind)),
            (false, None) => Some(BindingAction::Enable(InstanceClassKind::new(declared))),
            (false, Some(old)) if old.kind == declared => None,
            (false, Some(_)) => Some(BindingAction::UpdateKind(InstanceClassKind::new(declared))),
        }?;

        let next = match &action {
            BindingAction::Enable(kind) | BindingAction::UpdateKind(kind) => Some(kind.clone()),
            BindingAction::Disable(_) => None,
        };
        // send_replace never fails, even without receivers
        self.subscribed.send_replace(next);
        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        let resolver = KindResolver::new();

        // "" / "" -> noop
        assert_eq!(resolver.resolve(""), None);

        // K / "" -> Enable
        let action = resolver.resolve("OpenStackInstanceClass").unwrap();
        assert_eq!(
            action,
            BindingAction::Enable(InstanceClassKind::new("OpenStackInstanceClass"))
        );
        assert_eq!(action.to_string(), "Enable(OpenStackInstanceClass, apiVersion=deckhouse.io/v1)");
        assert_eq!(
            resolver.subscribed().map(|k| k.kind).as_deref(),
            Some("OpenStackInstanceClass")
        );

        // K / K -> noop
        assert_eq!(resolver.resolve("OpenStackInstanceClass"), None);

        // K1 / K2 -> UpdateKind
        assert_eq!(
            resolver.resolve("AcmeInstanceClass"),
            Some(BindingAction::UpdateKind(InstanceClassKind::new("AcmeInstanceClass")))
        );
        assert_eq!(
            resolver.subscribed().map(|k| k.kind).as_deref(),
            Some("AcmeInstanceClass")
        );

        // "" / K -> Disable
        assert_eq!(
            resolver.resolve(""),
            Some(BindingAction::Disable("AcmeInstanceClass".to_string()))
        );
        assert_eq!(resolver.subscribed(), None);
        assert_eq!(resolver.resolve(""), None);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let resolver = KindResolver::new();
        let mut rx = resolver.subscribe();
        resolver.resolve("AcmeInstanceClass");
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().as_ref().map(|k| k.kind.clone()),
            Some("AcmeInstanceClass".to_string())
        );
    }
}
