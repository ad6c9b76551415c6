use presale_core::UserId;
use presale_ledger::{LedgerReader, StoreError};

/// Answers "who referred this buyer?".
///
/// Called inside the settlement transaction with the transaction's own read
/// view, so the answer is consistent with the balances being written.
pub trait ReferralResolver: Send + Sync {
    fn resolve(
        &self,
        reader: &dyn LedgerReader,
        buyer: &UserId,
    ) -> Result<Option<UserId>, StoreError>;
}

/// Resolves the buyer's `referred_by` code to the account that owns it.
///
/// A missing buyer, a code nobody owns, or a buyer naming their own code
/// resolves to no referrer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferralCodeResolver;

impl ReferralResolver for ReferralCodeResolver {
    fn resolve(
        &self,
        reader: &dyn LedgerReader,
        buyer: &UserId,
    ) -> Result<Option<UserId>, StoreError> {
        let Some(user) = reader.get_user(buyer)? else {
            return Ok(None);
        };
        let Some(code) = user.referred_by.as_deref().map(str::trim).filter(|c| !c.is_empty())
        else {
            return Ok(None);
        };
        match reader.find_user_by_referral_code(code)? {
            Some(referrer) if referrer.id != user.id => Ok(Some(referrer.id)),
            Some(_) => {
                tracing::warn!(user_id = %user.id, "ignoring self-referral");
                Ok(None)
            }
            None => {
                tracing::debug!(user_id = %user.id, code, "referral code has no owner");
                Ok(None)
            }
        }
    }
}
