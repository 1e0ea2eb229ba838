use tracing::info;

use crate::api::VaultApi;
use crate::error::Result;

/// Mount path of the secret backend the data loader writes into.
pub const SECRET_MOUNT: &str = "secret/";

/// `kv` version the data loader's key layout assumes.
pub const SECRET_KV_VERSION: &str = "1";

/// What reconciling the secret backend had to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendReconciliation {
    /// The backend was already mounted at the required version.
    AlreadyCurrent,

    /// There was no backend; one was mounted.
    Mounted,

    /// The backend was at another version; it was unmounted and remounted.
    Remounted,
}

/// Makes sure `secret/` is a `kv` backend at the required version.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read or a mount or unmount
/// call fails.
pub async fn reconcile_secret_backend(api: &dyn VaultApi) -> Result<BackendReconciliation> {
    info!(target: "vault", "reconciling secret backend");

    let mounts = api.list_mounts().await?;

    let outcome = match mounts.get(SECRET_MOUNT) {
        Some(mount) if mount.version() == Some(SECRET_KV_VERSION) => {
            return Ok(BackendReconciliation::AlreadyCurrent);
        }
        Some(mount) => {
            info!(
                target: "vault",
                found = mount.version().unwrap_or("none"),
                required = SECRET_KV_VERSION,
                "secret backend at wrong version, unmounting"
            );
            api.unmount(SECRET_MOUNT).await?;
            BackendReconciliation::Remounted
        }
        None => BackendReconciliation::Mounted,
    };

    info!(target: "vault", version = SECRET_KV_VERSION, "mounting secret backend");
    api.mount_kv(SECRET_MOUNT, SECRET_KV_VERSION).await?;

    Ok(outcome)
}
