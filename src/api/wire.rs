//! The JSON shapes the backend speaks.
//!
//! The backend stores each bill as a flat object with Portuguese field names and wraps every
//! response in a `{success, data, error, message}` envelope. Dates travel as `YYYY-MM-DD` strings,
//! but a timestamp is tolerated and truncated to its date. Notes are either a single free-text string
//! or a list of timestamped entries.

use crate::api::{ApiError, ApiResult};
use crate::model::{
    Amount, Bill, BillFields, BillId, GroupId, Installment, Note, PaymentStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub(crate) const STATUS_PENDING: &str = "PENDENTE";
pub(crate) const STATUS_PAID: &str = "PAGO";

/// The response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct Envelope<T> {
    pub(crate) success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
}

impl<T> Envelope<T> {
    pub(crate) fn ok(data: T, message: Option<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message,
        }
    }

    pub(crate) fn err(error: impl Into<String>, message: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message,
        }
    }

    /// The most useful description of a failure.
    pub(crate) fn reason(&self) -> Option<String> {
        match (&self.error, &self.message) {
            (Some(error), Some(message)) => Some(format!("{error}: {message}")),
            (Some(error), None) => Some(error.clone()),
            (None, Some(message)) => Some(message.clone()),
            (None, None) => None,
        }
    }
}

/// One entry of the `observacoes` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WireNote {
    pub(crate) texto: String,
    pub(crate) data: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireNotes {
    List(Vec<WireNote>),
    Text(String),
}

impl Default for WireNotes {
    fn default() -> Self {
        WireNotes::List(Vec::new())
    }
}

/// A bill as the backend stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WireBill {
    #[serde(
        default,
        deserialize_with = "optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) id: Option<String>,
    pub(crate) descricao: String,
    pub(crate) valor: Amount,
    #[serde(deserialize_with = "date")]
    pub(crate) data_vencimento: NaiveDate,
    #[serde(default, deserialize_with = "optional_date")]
    pub(crate) data_pagamento: Option<NaiveDate>,
    #[serde(default, deserialize_with = "optional_string")]
    pub(crate) forma_pagamento: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub(crate) banco: Option<String>,
    #[serde(default, deserialize_with = "notes")]
    pub(crate) observacoes: WireNotes,
    #[serde(default = "default_status")]
    pub(crate) status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parcela_numero: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parcela_total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) grupo_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) updated_at: Option<DateTime<Utc>>,
    /// Computed by the backend for display. Never read back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) status_dinamico: Option<String>,
}

impl WireBill {
    /// The request body for creating or replacing a bill.
    pub(crate) fn from_fields(fields: &BillFields) -> Self {
        let (parcela_numero, parcela_total) = match fields.installment() {
            Some(installment) => (Some(installment.number), Some(installment.total)),
            None => (None, None),
        };
        Self {
            id: None,
            descricao: fields.description().to_string(),
            valor: fields.amount(),
            data_vencimento: fields.due_date(),
            data_pagamento: fields.payment_date(),
            forma_pagamento: non_empty(fields.payment_method()),
            banco: non_empty(fields.bank()),
            observacoes: WireNotes::List(
                fields
                    .notes()
                    .iter()
                    .map(|note| WireNote {
                        texto: note.text().to_string(),
                        data: note.at(),
                    })
                    .collect(),
            ),
            status: match fields.status() {
                PaymentStatus::Pending => STATUS_PENDING.to_string(),
                PaymentStatus::Paid => STATUS_PAID.to_string(),
            },
            parcela_numero,
            parcela_total,
            grupo_id: fields.group_id().map(|g| g.as_str().to_string()),
            created_at: None,
            updated_at: None,
            status_dinamico: None,
        }
    }

    pub(crate) fn from_bill(bill: &Bill) -> Self {
        let mut wire = Self::from_fields(bill.fields());
        wire.id = bill.id().map(|id| id.as_str().to_string());
        wire.created_at = bill.created_at();
        wire.updated_at = bill.updated_at();
        wire
    }

    /// The payment state. Anything other than paid, e.g. a cancelled bill, is treated as pending.
    pub(crate) fn payment_status(&self) -> PaymentStatus {
        if self.status.eq_ignore_ascii_case(STATUS_PAID) {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Pending
        }
    }

    pub(crate) fn fields(&self) -> BillFields {
        let installment = match (self.parcela_numero, self.parcela_total) {
            (Some(number), Some(total)) => Some(Installment { number, total }),
            _ => None,
        };
        let notes = match &self.observacoes {
            WireNotes::List(notes) => notes
                .iter()
                .map(|note| Note::new(note.texto.clone(), note.data))
                .collect(),
            WireNotes::Text(text) if text.trim().is_empty() => Vec::new(),
            WireNotes::Text(text) => vec![Note::new(
                text.clone(),
                self.created_at.unwrap_or_default(),
            )],
        };
        BillFields {
            description: self.descricao.clone(),
            amount: self.valor,
            due_date: self.data_vencimento,
            payment_date: self.data_pagamento,
            payment_method: self.forma_pagamento.clone().unwrap_or_default(),
            bank: self.banco.clone().unwrap_or_default(),
            notes,
            status: self.payment_status(),
            installment,
            group_id: self.grupo_id.clone().map(GroupId::new),
        }
    }

    /// Converts a bill returned by the backend. It must carry an id.
    pub(crate) fn into_bill(self) -> ApiResult<Bill> {
        let id = match self.id.as_deref() {
            Some(id) if !id.is_empty() => BillId::new(id),
            _ => return Err(ApiError::transient("The server returned a bill without an id")),
        };
        let fields = self.fields();
        Ok(Bill::confirmed(id, fields).with_timestamps(self.created_at, self.updated_at))
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn default_status() -> String {
    STATUS_PENDING.to_string()
}

/// Parses `YYYY-MM-DD`, ignoring anything after the date such as a time of day.
pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_date(&s).ok_or_else(|| serde::de::Error::custom(format!("Invalid date '{s}'")))
}

fn optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_date(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid date '{s}'"))),
    }
}

fn optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.filter(|s| !s.is_empty()))
}

/// Ids are strings in the in-memory backend and integers in a relational one.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(i64),
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let id: Option<IdRepr> = Option::deserialize(deserializer)?;
    Ok(id.map(|id| match id {
        IdRepr::Text(s) => s,
        IdRepr::Number(n) => n.to_string(),
    }))
}

fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

fn notes<'de, D>(deserializer: D) -> Result<WireNotes, D::Error>
where
    D: Deserializer<'de>,
{
    let notes: Option<WireNotes> = Option::deserialize(deserializer)?;
    Ok(notes.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const SEED: &str = r#"{
        "id": "1",
        "descricao": "ENERGY",
        "valor": 350.00,
        "data_vencimento": "2025-12-10",
        "frequencia": "PARCELA_UNICA",
        "forma_pagamento": "BOLETO",
        "banco": "BANK A",
        "status": "PENDENTE",
        "data_pagamento": null,
        "observacoes": "Power company",
        "created_at": "2025-11-01T12:00:00.000Z",
        "updated_at": "2025-11-01T12:00:00.000Z",
        "status_dinamico": "IMINENTE"
    }"#;

    #[test]
    fn test_parse_backend_record() {
        let wire: WireBill = serde_json::from_str(SEED).unwrap();
        let bill = wire.into_bill().unwrap();
        assert_eq!(bill.id(), Some(&BillId::new("1")));
        assert!(bill.is_synced());
        let fields = bill.fields();
        assert_eq!(fields.description(), "ENERGY");
        assert_eq!(fields.amount(), Amount::from_str("350").unwrap());
        assert_eq!(
            fields.due_date(),
            NaiveDate::from_ymd_opt(2025, 12, 10).unwrap()
        );
        assert_eq!(fields.payment_method(), "BOLETO");
        assert_eq!(fields.status(), PaymentStatus::Pending);
        assert_eq!(fields.notes().len(), 1);
        assert_eq!(fields.notes()[0].text(), "Power company");
        assert!(bill.created_at().is_some());
    }

    #[test]
    fn test_notes_as_list() {
        let json = r#"{
            "id": "9",
            "descricao": "CAR",
            "valor": "1,000.00",
            "data_vencimento": "2025-03-01T00:00:00",
            "observacoes": [{"texto": "first", "data": "2025-01-01T00:00:00Z"}],
            "status": "PAGO",
            "data_pagamento": "2025-02-27",
            "parcela_numero": 1,
            "parcela_total": 2,
            "grupo_id": "g1"
        }"#;
        let wire: WireBill = serde_json::from_str(json).unwrap();
        let fields = wire.fields();
        assert_eq!(fields.status(), PaymentStatus::Paid);
        assert_eq!(fields.notes()[0].text(), "first");
        assert_eq!(fields.installment(), Some(Installment { number: 1, total: 2 }));
        assert_eq!(fields.group_id(), Some(&GroupId::new("g1")));
        assert_eq!(
            fields.due_date(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
    }

    #[test]
    fn test_numeric_id() {
        let json = SEED.replace(r#""id": "1""#, r#""id": 17"#);
        let wire: WireBill = serde_json::from_str(&json).unwrap();
        assert_eq!(wire.id.as_deref(), Some("17"));
    }

    #[test]
    fn test_missing_id_is_an_error() {
        let mut wire: WireBill = serde_json::from_str(SEED).unwrap();
        wire.id = None;
        assert!(wire.into_bill().is_err());
    }

    #[test]
    fn test_request_body_uses_backend_names() {
        let fields = BillFields::new(
            "RENT",
            Amount::from_str("1200").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        );
        let value = serde_json::to_value(WireBill::from_fields(&fields)).unwrap();
        assert_eq!(value["descricao"], "RENT");
        assert_eq!(value["valor"], 1200.0);
        assert_eq!(value["data_vencimento"], "2025-03-01");
        assert_eq!(value["status"], STATUS_PENDING);
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_envelope_reason() {
        let envelope: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"success": false, "error": "Bill not found"}"#).unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.reason().as_deref(), Some("Bill not found"));
    }
}
