//! Types that represent the core data model, such as `Bill` and `Amount`.
mod amount;
mod bill;
mod filter;
mod identity;
mod status;
mod summary;

pub use amount::{Amount, AmountError};
pub use bill::{
    Bill, BillFields, BillPatch, Installment, Note, PaymentStatus, ValidationError,
};
pub use filter::{BillFilter, Month, SortKey};
pub use identity::{BillId, GroupId, Identity, TempId};
pub use status::{classify, DisplayStatus, StatusTiers, DEFAULT_DUE_SOON_DAYS};
pub use summary::Summary;
