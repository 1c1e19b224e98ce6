//! App-protection enrollment

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use proxauth_tokens::{sources::Account, AuthError};
use tokio::sync::broadcast;

/// The enrollment state of an account, as reported by the app-protection
/// subsystem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnrollmentStatus {
    /// Registration has not completed yet
    Pending,
    /// The account is enrolled and policy has been applied
    Succeeded,
    /// Enrollment failed
    Failed,
    /// The user must authorize enrollment
    AuthorizationNeeded,
    /// The user is not licensed for app protection
    NotLicensed,
    /// A different account is already enrolled
    WrongUser,
    /// Enrollment requires the company portal app
    CompanyPortalRequired,
    /// The account has been unenrolled
    Unenrolled,
}

impl EnrollmentStatus {
    /// Whether proxy access may proceed
    #[inline]
    pub fn is_succeeded(self) -> bool {
        self == Self::Succeeded
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::AuthorizationNeeded => "authorization needed",
            Self::NotLicensed => "not licensed",
            Self::WrongUser => "wrong user",
            Self::CompanyPortalRequired => "company portal required",
            Self::Unenrolled => "unenrolled",
        };
        f.write_str(s)
    }
}

/// The outcome of a compliance check, as reported by the app-protection
/// subsystem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComplianceStatus {
    /// The account satisfies the compliance policy
    Compliant,
    /// The account does not satisfy the compliance policy
    NotCompliant,
    /// The check is still in progress
    Pending,
    /// The compliance service could not be reached
    NetworkFailure,
    /// The compliance service reported an error
    ServiceFailure,
    /// The check failed on the device
    ClientError,
    /// Remediation requires the company portal app
    CompanyPortalRequired,
    /// The subsystem did not report a status
    Unknown,
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Compliant => "compliant",
            Self::NotCompliant => "not compliant",
            Self::Pending => "pending",
            Self::NetworkFailure => "network failure",
            Self::ServiceFailure => "service failure",
            Self::ClientError => "client error",
            Self::CompanyPortalRequired => "company portal required",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A notification pushed by the app-protection subsystem
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateNotification {
    /// Enrollment of an account finished, successfully or not
    Enrollment {
        /// The provider's identifier of the account
        account_id: String,
        /// The resulting enrollment state
        status: EnrollmentStatus,
    },
    /// A compliance check for an account finished
    Compliance {
        /// The provider's identifier of the account
        account_id: String,
        /// The outcome of the check
        status: ComplianceStatus,
        /// A short description of the problem, to show to the user
        title: Option<String>,
        /// A longer description of the problem, to show to the user
        message: Option<String>,
    },
}

impl GateNotification {
    /// The account the notification concerns
    pub fn account_id(&self) -> &str {
        match self {
            Self::Enrollment { account_id, .. } | Self::Compliance { account_id, .. } => account_id,
        }
    }
}

/// The app-protection subsystem
///
/// Registration is asynchronous on the subsystem's side: an account is
/// registered, and its [`status()`][EnrollmentGate::status] later reaches
/// [`EnrollmentStatus::Succeeded`] once policy has been applied. The
/// subsystem announces such changes through [`subscribe()`][EnrollmentGate::subscribe].
#[async_trait]
pub trait EnrollmentGate: Send + Sync {
    /// Registers an account for app protection
    async fn register_account(&self, account: &Account) -> Result<(), AuthError>;

    /// Removes an account from app protection
    async fn unregister_account(&self, account: &Account) -> Result<(), AuthError>;

    /// The current enrollment state of an account
    async fn status(&self, account: &Account) -> EnrollmentStatus;

    /// Asks the subsystem to bring an account into compliance, presenting
    /// its own UI where needed
    ///
    /// The outcome is reported later as a [`GateNotification::Compliance`].
    async fn remediate_compliance(&self, account: &Account) -> Result<(), AuthError>;

    /// Subscribes to enrollment and compliance notifications
    ///
    /// Only notifications sent after subscribing are received.
    fn subscribe(&self) -> broadcast::Receiver<GateNotification>;
}

#[async_trait]
impl<G> EnrollmentGate for Arc<G>
where
    G: EnrollmentGate + ?Sized,
{
    async fn register_account(&self, account: &Account) -> Result<(), AuthError> {
        (**self).register_account(account).await
    }

    async fn unregister_account(&self, account: &Account) -> Result<(), AuthError> {
        (**self).unregister_account(account).await
    }

    async fn status(&self, account: &Account) -> EnrollmentStatus {
        (**self).status(account).await
    }

    async fn remediate_compliance(&self, account: &Account) -> Result<(), AuthError> {
        (**self).remediate_compliance(account).await
    }

    fn subscribe(&self) -> broadcast::Receiver<GateNotification> {
        (**self).subscribe()
    }
}

/// An enrollment gate that keeps state in memory
///
/// Registered accounts move to a configurable status, [`Succeeded`][EnrollmentStatus::Succeeded]
/// by default. Unknown accounts are [`Unenrolled`][EnrollmentStatus::Unenrolled].
/// The status of any account can be changed at will, which makes this gate
/// useful for exercising readiness handling.
///
/// Remediating a registered account makes it compliant and enrolled.
/// Every change is announced to subscribers.
#[derive(Debug)]
pub struct InMemoryGate {
    on_register: EnrollmentStatus,
    accounts: DashMap<String, EnrollmentStatus>,
    compliance: DashMap<String, ComplianceStatus>,
    notifications: broadcast::Sender<GateNotification>,
}

impl Default for InMemoryGate {
    fn default() -> Self {
        Self::new(EnrollmentStatus::Succeeded)
    }
}

impl InMemoryGate {
    /// Constructs a gate that moves registered accounts to `on_register`
    pub fn new(on_register: EnrollmentStatus) -> Self {
        let (notifications, _) = broadcast::channel(16);
        Self {
            on_register,
            accounts: DashMap::new(),
            compliance: DashMap::new(),
            notifications,
        }
    }

    /// Overrides the status of an account
    pub fn set_status(&self, account: &Account, status: EnrollmentStatus) {
        self.accounts.insert(account.id.clone(), status);
        self.notify(GateNotification::Enrollment {
            account_id: account.id.clone(),
            status,
        });
    }

    /// Overrides the compliance of an account
    pub fn set_compliance(&self, account: &Account, status: ComplianceStatus) {
        self.compliance.insert(account.id.clone(), status);
        self.notify(GateNotification::Compliance {
            account_id: account.id.clone(),
            status,
            title: None,
            message: None,
        });
    }

    /// The last known compliance of an account
    pub fn compliance(&self, account: &Account) -> ComplianceStatus {
        self.compliance
            .get(&account.id)
            .map_or(ComplianceStatus::Unknown, |s| *s)
    }

    fn notify(&self, notification: GateNotification) {
        // Nobody listening is fine
        let _ = self.notifications.send(notification);
    }

    /// Whether the account is currently registered
    pub fn is_registered(&self, account: &Account) -> bool {
        self.accounts
            .get(&account.id)
            .map_or(false, |s| *s != EnrollmentStatus::Unenrolled)
    }
}

#[async_trait]
impl EnrollmentGate for InMemoryGate {
    async fn register_account(&self, account: &Account) -> Result<(), AuthError> {
        tracing::debug!(account = %account.username, status = %self.on_register, "registering account");
        self.set_status(account, self.on_register);
        Ok(())
    }

    async fn unregister_account(&self, account: &Account) -> Result<(), AuthError> {
        tracing::debug!(account = %account.username, "unregistering account");
        self.accounts.remove(&account.id);
        Ok(())
    }

    async fn status(&self, account: &Account) -> EnrollmentStatus {
        self.accounts
            .get(&account.id)
            .map_or(EnrollmentStatus::Unenrolled, |s| *s)
    }

    async fn remediate_compliance(&self, account: &Account) -> Result<(), AuthError> {
        if !self.is_registered(account) {
            return Err(AuthError::NoAccount);
        }

        tracing::debug!(account = %account.username, "remediating compliance");
        self.set_compliance(account, ComplianceStatus::Compliant);
        self.set_status(account, EnrollmentStatus::Succeeded);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<GateNotification> {
        self.notifications.subscribe()
    }
}
