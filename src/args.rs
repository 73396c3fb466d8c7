//! These structs provide the CLI interface for the bills CLI.

use crate::model::{Amount, BillFilter, BillPatch, DisplayStatus, Month, SortKey};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// bills: keep track of the bills you have to pay.
///
/// Changes are applied to your local list at once and sent to the bills backend in the background.
/// When the backend cannot be reached, changes are kept in $BILLS_HOME/pending.json and sent the
/// next time a command runs with the backend available.
///
/// Set BILLS_IN_TEST_MODE to any value to work against in-memory sample data instead of a backend.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory and the configuration file.
    ///
    /// This is the first command to run. Pass --api-url if the backend does not run on
    /// http://localhost:3000/.
    Init(InitArgs),
    /// Store the token used to authenticate with the backend.
    Login(LoginArgs),
    /// Forget the token and any changes that have not been sent.
    Logout,
    /// List bills.
    List(ListArgs),
    /// Add a bill, or a series of monthly installments.
    Add(AddArgs),
    /// Change fields of a bill.
    Edit(EditArgs),
    /// Change a bill and carry its description and notes over to the other installments of its
    /// group.
    EditGroup(EditArgs),
    /// Mark a bill as paid, or as not paid with --undo.
    Pay(PayArgs),
    /// Add a note to a bill.
    Note(NoteArgs),
    /// Delete a bill.
    Delete(IdArgs),
    /// Show counts and totals by status.
    Summary,
    /// Send pending changes and refresh the list from the backend.
    Sync,
    /// Keep syncing until interrupted, checking the backend periodically.
    Watch,
    /// Run a local backend that keeps bills in memory.
    Serve(ServeArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG. See the tracing-subscriber crate for instructions.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where bills data and configuration is held. Defaults to ~/bills
    #[arg(long, env = "BILLS_HOME", default_value_t = default_bills_home())]
    bills_home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, bills_home: PathBuf) -> Self {
        Self {
            log_level,
            bills_home: bills_home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn bills_home(&self) -> &DisplayPath {
        &self.bills_home
    }
}

/// (Not shown): Args for the `bills init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The base URL of the bills backend.
    #[arg(long, default_value = crate::config::DEFAULT_API_URL)]
    api_url: String,
}

impl InitArgs {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

/// (Not shown): Args for the `bills login` command.
#[derive(Debug, Parser, Clone)]
pub struct LoginArgs {
    /// The bearer token issued by the backend.
    #[arg(long, env = "BILLS_TOKEN", hide_env_values = true)]
    token: String,
}

impl LoginArgs {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// (Not shown): Args for the `bills list` command.
#[derive(Debug, Parser, Clone, Default)]
pub struct ListArgs {
    /// Only bills with this status: overdue, due_soon, pending or paid.
    #[arg(long)]
    status: Option<DisplayStatus>,

    /// Only bills whose description, payment method or bank contains this text.
    #[arg(long)]
    search: Option<String>,

    /// Only bills due in this month, e.g. 2025-03.
    #[arg(long)]
    month: Option<Month>,

    /// Sort by stored, due_date, amount or description.
    #[arg(long, default_value_t = SortKey::DueDate)]
    sort: SortKey,

    /// Reverse the order.
    #[arg(long)]
    desc: bool,
}

impl ListArgs {
    pub fn filter(&self) -> BillFilter {
        BillFilter {
            status: self.status,
            search: self.search.clone(),
            month: self.month,
            sort: self.sort,
            descending: self.desc,
        }
    }
}

impl From<BillFilter> for ListArgs {
    fn from(filter: BillFilter) -> Self {
        Self {
            status: filter.status,
            search: filter.search,
            month: filter.month,
            sort: filter.sort,
            desc: filter.descending,
        }
    }
}

/// (Not shown): Args for the `bills add` command.
#[derive(Debug, Parser, Clone)]
pub struct AddArgs {
    /// What the bill is for.
    description: String,

    /// The amount, e.g. 1200 or 1,200.00
    #[arg(long)]
    amount: Amount,

    /// The due date, YYYY-MM-DD. With --installments this is the due date of the first one.
    #[arg(long)]
    due: NaiveDate,

    #[arg(long, default_value = "")]
    method: String,

    #[arg(long, default_value = "")]
    bank: String,

    /// A first note.
    #[arg(long)]
    note: Option<String>,

    /// Split the amount into this many monthly installments.
    #[arg(long)]
    installments: Option<u32>,
}

impl AddArgs {
    pub fn new(description: impl Into<String>, amount: Amount, due: NaiveDate) -> Self {
        Self {
            description: description.into(),
            amount,
            due,
            method: String::new(),
            bank: String::new(),
            note: None,
            installments: None,
        }
    }

    pub fn with_installments(mut self, installments: u32) -> Self {
        self.installments = Some(installments);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn due(&self) -> NaiveDate {
        self.due
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn bank(&self) -> &str {
        &self.bank
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn installments(&self) -> Option<u32> {
        self.installments
    }
}

/// (Not shown): Args for the `bills edit` and `bills edit-group` commands.
#[derive(Debug, Parser, Clone)]
pub struct EditArgs {
    /// The id of the bill, as shown by `bills list`.
    id: String,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    amount: Option<Amount>,

    #[arg(long)]
    due: Option<NaiveDate>,

    #[arg(long)]
    method: Option<String>,

    #[arg(long)]
    bank: Option<String>,
}

impl EditArgs {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            amount: None,
            due: None,
            method: None,
            bank: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn patch(&self) -> BillPatch {
        BillPatch {
            description: self.description.clone(),
            amount: self.amount,
            due_date: self.due,
            payment_method: self.method.clone(),
            bank: self.bank.clone(),
            ..Default::default()
        }
    }
}

/// (Not shown): Args for the `bills pay` command.
#[derive(Debug, Parser, Clone)]
pub struct PayArgs {
    id: String,

    /// The payment date, today if not given.
    #[arg(long, conflicts_with = "undo")]
    on: Option<NaiveDate>,

    /// Mark the bill as not paid.
    #[arg(long)]
    undo: bool,
}

impl PayArgs {
    pub fn new(id: impl Into<String>, on: Option<NaiveDate>, undo: bool) -> Self {
        Self {
            id: id.into(),
            on,
            undo,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn on(&self) -> Option<NaiveDate> {
        self.on
    }

    pub fn undo(&self) -> bool {
        self.undo
    }
}

/// (Not shown): Args for the `bills note` command.
#[derive(Debug, Parser, Clone)]
pub struct NoteArgs {
    id: String,
    text: String,
}

impl NoteArgs {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// (Not shown): Args for commands that only take a bill id.
#[derive(Debug, Parser, Clone)]
pub struct IdArgs {
    id: String,
}

impl IdArgs {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// (Not shown): Args for the `bills serve` command.
#[derive(Debug, Parser, Clone)]
pub struct ServeArgs {
    /// The address to listen on.
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: SocketAddr,

    /// When given, requests must carry `Authorization: Bearer <token>`.
    #[arg(long, env = "BILLS_SERVER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Start with a few sample bills.
    #[arg(long)]
    seed: bool,
}

impl ServeArgs {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn seed(&self) -> bool {
        self.seed
    }
}

fn default_bills_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("bills"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --bills-home or BILLS_HOME instead of relying on the default \
                bills home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("bills")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add() {
        let args = Args::try_parse_from([
            "bills",
            "--bills-home",
            "/tmp/bills",
            "add",
            "RENT",
            "--amount",
            "1,200.00",
            "--due",
            "2025-03-05",
            "--installments",
            "3",
        ])
        .unwrap();
        assert_eq!(args.common().bills_home().path(), Path::new("/tmp/bills"));
        let Command::Add(add) = args.command() else {
            panic!("expected add, got {:?}", args.command());
        };
        assert_eq!(add.description(), "RENT");
        assert_eq!(add.amount(), Amount::from_str("1200").unwrap());
        assert_eq!(add.installments(), Some(3));
    }

    #[test]
    fn test_parse_list_filter() {
        let args = Args::try_parse_from([
            "bills", "list", "--status", "due_soon", "--month", "2025-03", "--sort", "amount",
            "--desc",
        ])
        .unwrap();
        let Command::List(list) = args.command() else {
            panic!("expected list");
        };
        let filter = list.filter();
        assert_eq!(filter.status, Some(DisplayStatus::DueSoon));
        assert_eq!(filter.month, Some(Month::from_str("2025-03").unwrap()));
        assert_eq!(filter.sort, SortKey::Amount);
        assert!(filter.descending);
    }

    #[test]
    fn test_pay_undo_conflicts_with_date() {
        assert!(Args::try_parse_from(["bills", "pay", "7", "--undo", "--on", "2025-03-01"]).is_err());
    }

    #[test]
    fn test_edit_patch() {
        let args = Args::try_parse_from(["bills", "edit-group", "7", "--description", "CAR"]).unwrap();
        let Command::EditGroup(edit) = args.command() else {
            panic!("expected edit-group");
        };
        let patch = edit.patch();
        assert_eq!(patch.description.as_deref(), Some("CAR"));
        assert!(patch.amount.is_none());
    }
}
