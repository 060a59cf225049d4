use crate::domain::ports::Transaction;
use crate::error::Result;
use tracing::warn;

/// Commits a core-scope and a status-scope transaction, in that order.
///
/// The two commits are not atomic together. If the core commit fails the
/// status transaction is rolled back and nothing is applied. If the status
/// commit fails after the core commit succeeded, the core changes stay and a
/// reconciliation warning is logged.
pub async fn commit_both<C, S>(core: Box<C>, status: Box<S>, operation: &str) -> Result<()>
where
    C: Transaction + ?Sized,
    S: Transaction + ?Sized,
{
    if let Err(err) = core.commit().await {
        if let Err(rollback_err) = status.rollback().await {
            warn!(operation, error = %rollback_err, "status rollback failed after core commit failure");
        }
        return Err(err);
    }
    if let Err(err) = status.commit().await {
        warn!(
            operation,
            error = %err,
            "core scope committed but status scope failed; stores need reconciliation"
        );
        return Err(err);
    }
    Ok(())
}
