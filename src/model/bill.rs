use crate::model::identity::{BillId, GroupId, Identity, TempId};
use crate::model::status::{classify, DisplayStatus, StatusTiers};
use crate::model::Amount;
use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The persisted payment state of a bill. Whether a pending bill is overdue or due soon is derived,
/// see `DisplayStatus`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
}

serde_plain::derive_display_from_serialize!(PaymentStatus);
serde_plain::derive_fromstr_from_deserialize!(PaymentStatus);

/// A timestamped note attached to a bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub(crate) text: String,
    pub(crate) at: DateTime<Utc>,
}

impl Note {
    pub fn new(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            at,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }
}

/// Position of a bill within its installment group, e.g. 2 of 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Installment {
    pub number: u32,
    pub total: u32,
}

impl Display for Installment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.number, self.total)
    }
}

/// The user-editable content of a bill. This is what is sent to the backend when a bill is created
/// or updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BillFields {
    pub(crate) description: String,
    pub(crate) amount: Amount,
    pub(crate) due_date: NaiveDate,
    #[serde(default)]
    pub(crate) payment_date: Option<NaiveDate>,
    #[serde(default)]
    pub(crate) payment_method: String,
    #[serde(default)]
    pub(crate) bank: String,
    #[serde(default)]
    pub(crate) notes: Vec<Note>,
    #[serde(default)]
    pub(crate) status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) installment: Option<Installment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) group_id: Option<GroupId>,
}

impl BillFields {
    /// Creates a pending bill with the three required fields. Use the `with_*` functions for the
    /// rest.
    pub fn new(description: impl Into<String>, amount: Amount, due_date: NaiveDate) -> Self {
        Self {
            description: description.into(),
            amount,
            due_date,
            payment_date: None,
            payment_method: String::new(),
            bank: String::new(),
            notes: Vec::new(),
            status: PaymentStatus::Pending,
            installment: None,
            group_id: None,
        }
    }

    pub fn with_payment_method(mut self, payment_method: impl Into<String>) -> Self {
        self.payment_method = payment_method.into();
        self
    }

    pub fn with_bank(mut self, bank: impl Into<String>) -> Self {
        self.bank = bank.into();
        self
    }

    pub fn with_note(mut self, note: Note) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_paid(mut self, payment_date: NaiveDate) -> Self {
        self.status = PaymentStatus::Paid;
        self.payment_date = Some(payment_date);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn payment_date(&self) -> Option<NaiveDate> {
        self.payment_date
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn bank(&self) -> &str {
        &self.bank
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn installment(&self) -> Option<Installment> {
        self.installment
    }

    pub fn group_id(&self) -> Option<&GroupId> {
        self.group_id.as_ref()
    }

    /// Checks the invariants that must hold before a bill is stored or sent anywhere.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::MissingDescription);
        }
        if !self.amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(self.amount));
        }
        if let Some(installment) = self.installment {
            if installment.number == 0 || installment.number > installment.total {
                return Err(ValidationError::BadInstallment(installment));
            }
        }
        Ok(())
    }

    /// Splits this draft into `count` monthly installments sharing a new `GroupId`. The amount is
    /// divided between the installments and the first one is due on this draft's due date.
    pub fn into_installments(self, count: u32) -> Result<Vec<BillFields>, ValidationError> {
        if count == 0 {
            return Err(ValidationError::NoInstallments);
        }
        self.validate()?;
        let group_id = GroupId::generate();
        let amounts = self.amount.split(count);
        let mut drafts = Vec::with_capacity(count as usize);
        for (ix, amount) in amounts.into_iter().enumerate() {
            let number = ix as u32 + 1;
            let due_date = self
                .due_date
                .checked_add_months(Months::new(ix as u32))
                .ok_or(ValidationError::DateOutOfRange)?;
            let mut draft = self.clone();
            draft.amount = amount;
            draft.due_date = due_date;
            draft.installment = Some(Installment {
                number,
                total: count,
            });
            draft.group_id = Some(group_id.clone());
            draft.validate()?;
            drafts.push(draft);
        }
        Ok(drafts)
    }
}

/// A set of field changes. `None` means "leave as it is".
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillPatch {
    pub description: Option<String>,
    pub amount: Option<Amount>,
    pub due_date: Option<NaiveDate>,
    /// `Some(None)` clears the payment date.
    pub payment_date: Option<Option<NaiveDate>>,
    pub payment_method: Option<String>,
    pub bank: Option<String>,
    pub status: Option<PaymentStatus>,
    pub notes: Option<Vec<Note>>,
    /// Appended after `notes` has been applied.
    pub add_note: Option<Note>,
}

impl BillPatch {
    pub fn is_empty(&self) -> bool {
        self == &BillPatch::default()
    }

    /// Marks the bill as paid on `date`.
    pub fn paid(date: NaiveDate) -> Self {
        Self {
            status: Some(PaymentStatus::Paid),
            payment_date: Some(Some(date)),
            ..Default::default()
        }
    }

    /// Marks the bill as not paid and clears its payment date.
    pub fn unpaid() -> Self {
        Self {
            status: Some(PaymentStatus::Pending),
            payment_date: Some(None),
            ..Default::default()
        }
    }

    pub fn note(note: Note) -> Self {
        Self {
            add_note: Some(note),
            ..Default::default()
        }
    }

    /// The part of this patch that installments of one group share.
    pub fn shared_part(&self) -> BillPatch {
        BillPatch {
            description: self.description.clone(),
            notes: self.notes.clone(),
            add_note: self.add_note.clone(),
            ..Default::default()
        }
    }

    /// Applies the changes to `fields`, returning the result after validating it.
    pub fn apply(&self, fields: &BillFields) -> Result<BillFields, ValidationError> {
        let mut out = fields.clone();
        if let Some(description) = &self.description {
            out.description = description.clone();
        }
        if let Some(amount) = self.amount {
            out.amount = amount;
        }
        if let Some(due_date) = self.due_date {
            out.due_date = due_date;
        }
        if let Some(payment_date) = self.payment_date {
            out.payment_date = payment_date;
        }
        if let Some(payment_method) = &self.payment_method {
            out.payment_method = payment_method.clone();
        }
        if let Some(bank) = &self.bank {
            out.bank = bank.clone();
        }
        if let Some(status) = self.status {
            out.status = status;
        }
        if let Some(notes) = &self.notes {
            out.notes = notes.clone();
        }
        if let Some(note) = &self.add_note {
            out.notes.push(note.clone());
        }
        out.validate()?;
        Ok(out)
    }
}

/// A bill record as held in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Bill {
    identity: Identity,
    /// Kept after the backend assigns a permanent id, so that older references still resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temp_id: Option<TempId>,
    #[serde(flatten)]
    fields: BillFields,
    synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl Bill {
    /// A bill that exists only locally and waits to be sent to the backend.
    pub fn local(temp_id: TempId, fields: BillFields) -> Self {
        Self {
            identity: Identity::Temporary(temp_id.clone()),
            temp_id: Some(temp_id),
            fields,
            synced: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// A bill as confirmed by the backend.
    pub fn confirmed(id: BillId, fields: BillFields) -> Self {
        Self {
            identity: Identity::Permanent(id),
            temp_id: None,
            fields,
            synced: true,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_timestamps(
        mut self,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn id(&self) -> Option<&BillId> {
        match &self.identity {
            Identity::Permanent(id) => Some(id),
            Identity::Temporary(_) => None,
        }
    }

    pub fn temp_id(&self) -> Option<&TempId> {
        self.temp_id.as_ref()
    }

    /// True when the backend has never confirmed this bill.
    pub fn is_local_only(&self) -> bool {
        self.identity.is_temporary()
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn fields(&self) -> &BillFields {
        &self.fields
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// True if `key` refers to this bill, either by its permanent id or by its temporary id.
    pub fn matches(&self, key: &Identity) -> bool {
        match key {
            Identity::Permanent(id) => self.id() == Some(id),
            Identity::Temporary(temp_id) => self.temp_id.as_ref() == Some(temp_id),
        }
    }

    pub fn display_status(&self, today: NaiveDate, tiers: StatusTiers) -> DisplayStatus {
        classify(self, today, tiers)
    }

    /// Replaces the editable fields and marks the bill as not yet confirmed.
    pub(crate) fn set_fields(&mut self, fields: BillFields) {
        self.fields = fields;
        self.synced = false;
    }

    /// Takes on the permanent id the backend assigned, keeping the temporary id as history.
    pub(crate) fn assign_id(&mut self, id: BillId) {
        if let Identity::Temporary(temp_id) = &self.identity {
            self.temp_id = Some(temp_id.clone());
        }
        self.identity = Identity::Permanent(id);
    }

    /// Carries this bill's temporary id over to `server`, the backend's copy of the same bill.
    pub(crate) fn adopt_temp_id(&self, mut server: Bill) -> Bill {
        if server.temp_id.is_none() {
            server.temp_id = self.temp_id.clone();
        }
        server
    }
}

/// Reasons a bill or an edit is rejected before anything is changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingDescription,
    NonPositiveAmount(Amount),
    BadInstallment(Installment),
    NoInstallments,
    DateOutOfRange,
    EmptyPatch,
    EmptyNote,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingDescription => f.write_str("A description is required"),
            ValidationError::NonPositiveAmount(amount) => {
                write!(f, "The amount must be greater than zero, got {amount}")
            }
            ValidationError::BadInstallment(installment) => {
                write!(f, "Invalid installment {installment}")
            }
            ValidationError::NoInstallments => f.write_str("At least one installment is required"),
            ValidationError::DateOutOfRange => f.write_str("The due date is out of range"),
            ValidationError::EmptyPatch => f.write_str("Nothing to change"),
            ValidationError::EmptyNote => f.write_str("A note cannot be empty"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn rent() -> BillFields {
        BillFields::new("RENT", Amount::from_str("1200.00").unwrap(), date("2025-03-01"))
    }

    #[test]
    fn test_validate_ok() {
        assert!(rent().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_description() {
        let mut fields = rent();
        fields.description = "   ".to_string();
        assert_eq!(
            fields.validate().unwrap_err(),
            ValidationError::MissingDescription
        );
    }

    #[test]
    fn test_validate_rejects_non_positive_amount() {
        let mut fields = rent();
        fields.amount = Amount::ZERO;
        assert!(matches!(
            fields.validate().unwrap_err(),
            ValidationError::NonPositiveAmount(_)
        ));
        fields.amount = Amount::from_str("-1").unwrap();
        assert!(fields.validate().is_err());
    }

    #[test]
    fn test_into_installments() {
        let drafts = rent().into_installments(3).unwrap();
        assert_eq!(drafts.len(), 3);
        let group = drafts[0].group_id().unwrap().clone();
        for (ix, draft) in drafts.iter().enumerate() {
            assert_eq!(draft.group_id(), Some(&group));
            assert_eq!(draft.installment().unwrap().number, ix as u32 + 1);
            assert_eq!(draft.installment().unwrap().total, 3);
            assert_eq!(draft.description(), "RENT");
        }
        assert_eq!(drafts[1].due_date(), date("2025-04-01"));
        assert_eq!(drafts[2].due_date(), date("2025-05-01"));
        let total: Amount = drafts.iter().map(|d| d.amount()).sum();
        assert_eq!(total, Amount::from_str("1200").unwrap());
    }

    #[test]
    fn test_into_installments_zero() {
        assert_eq!(
            rent().into_installments(0).unwrap_err(),
            ValidationError::NoInstallments
        );
    }

    #[test]
    fn test_patch_apply() {
        let paid = BillPatch::paid(date("2025-02-20")).apply(&rent()).unwrap();
        assert_eq!(paid.status(), PaymentStatus::Paid);
        assert_eq!(paid.payment_date(), Some(date("2025-02-20")));

        let unpaid = BillPatch::unpaid().apply(&paid).unwrap();
        assert_eq!(unpaid.status(), PaymentStatus::Pending);
        assert_eq!(unpaid.payment_date(), None);
    }

    #[test]
    fn test_patch_apply_validates() {
        let patch = BillPatch {
            amount: Some(Amount::ZERO),
            ..Default::default()
        };
        assert!(patch.apply(&rent()).is_err());
    }

    #[test]
    fn test_patch_shared_part() {
        let patch = BillPatch {
            description: Some("CAR".to_string()),
            bank: Some("BANK A".to_string()),
            ..Default::default()
        };
        let shared = patch.shared_part();
        assert_eq!(shared.description.as_deref(), Some("CAR"));
        assert!(shared.bank.is_none());
    }

    #[test]
    fn test_bill_identity_and_matches() {
        let temp_id = TempId::generate();
        let mut bill = Bill::local(temp_id.clone(), rent());
        assert!(bill.is_local_only());
        assert!(bill.matches(&Identity::Temporary(temp_id.clone())));

        bill.assign_id(BillId::new("42"));
        assert_eq!(bill.id(), Some(&BillId::new("42")));
        assert!(bill.matches(&Identity::Permanent(BillId::new("42"))));
        // The temporary id still resolves.
        assert!(bill.matches(&Identity::Temporary(temp_id)));
    }

    #[test]
    fn test_bill_serde() {
        let bill = Bill::local(TempId::generate(), rent());
        let json = serde_json::to_string(&bill).unwrap();
        let back: Bill = serde_json::from_str(&json).unwrap();
        assert_eq!(bill, back);
    }
}
