pub mod balance;
pub mod dates;

use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{UpstreamError, UpstreamResult};
use crate::security::token_cache::TokenCache;
use crate::utils::timing::{timed, CallHook, Hooks};
use balance::{derive_balance, BalanceMatchers, DerivedBalance};
use dates::normalize_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySign {
    Credit,
    Debit,
    Unknown,
}

/// One line of the statement feed.
///
/// The four fields balance derivation reads are parsed out; the upstream
/// object is kept as received and is what gets serialized back, so amounts
/// stay JSON numbers and dates keep their original type.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEntry {
    pub amount: Decimal,
    pub sign_indicator: String,
    pub date: String,
    pub description: String,
    raw: Map<String, Value>,
}

const AMOUNT: &str = "valorLancamento";
const SIGN: &str = "indicadorSinalLancamento";
const DATE: &str = "dataLancamento";
const DESCRIPTION: &str = "textoDescricaoHistorico";

fn parse_amount(value: Option<&Value>) -> Result<Decimal, String> {
    let text = match value {
        None | Some(Value::Null) => return Ok(Decimal::ZERO),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Decimal::ZERO),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => return Err(format!("{AMOUNT} is not a number: {other}")),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| format!("{AMOUNT} {text:?}: {e}"))
}

// dataLancamento comes back as a number (DDMMYYYY without leading zero) or a string.
fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}

impl TransactionEntry {
    pub fn new(
        amount: Decimal,
        sign_indicator: impl Into<String>,
        date: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let (sign_indicator, date, description) =
            (sign_indicator.into(), date.into(), description.into());
        let amount_value = serde_json::from_str::<Value>(&amount.to_string())
            .unwrap_or_else(|_| Value::String(amount.to_string()));

        let mut raw = Map::new();
        raw.insert(AMOUNT.to_string(), amount_value);
        raw.insert(SIGN.to_string(), Value::String(sign_indicator.clone()));
        raw.insert(DATE.to_string(), Value::String(date.clone()));
        raw.insert(DESCRIPTION.to_string(), Value::String(description.clone()));

        Self {
            amount,
            sign_indicator,
            date,
            description,
            raw,
        }
    }

    /// Parse an upstream object, keeping it for relay.
    pub fn from_raw(raw: Map<String, Value>) -> Result<Self, String> {
        Ok(Self {
            amount: parse_amount(raw.get(AMOUNT))?,
            sign_indicator: text_of(raw.get(SIGN)),
            date: text_of(raw.get(DATE)),
            description: text_of(raw.get(DESCRIPTION)),
            raw,
        })
    }

    /// Any field of the upstream object, including the ones not parsed.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn sign(&self) -> EntrySign {
        match self.sign_indicator.trim() {
            "C" | "c" => EntrySign::Credit,
            "D" | "d" => EntrySign::Debit,
            _ => EntrySign::Unknown,
        }
    }

    /// Amount with the sign indicator applied; unknown indicators keep the raw value.
    pub fn signed_amount(&self) -> Decimal {
        match self.sign() {
            EntrySign::Credit => self.amount.abs(),
            EntrySign::Debit => -self.amount.abs(),
            EntrySign::Unknown => self.amount,
        }
    }
}

impl<'de> Deserialize<'de> for TransactionEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_raw(raw).map_err(de::Error::custom)
    }
}

impl Serialize for TransactionEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.raw.serialize(serializer)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<TransactionEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<TransactionEntry>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A statement response: the entries plus whatever else the page carries
/// (`numeroPaginaAtual`, `quantidadeRegistroPaginaAtual`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "listaLancamento", default, deserialize_with = "null_as_empty")]
    pub entries: Vec<TransactionEntry>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Optional statement period, in any shape [`normalize_date`] accepts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRange {
    #[serde(rename = "dataInicio")]
    pub start_date: Option<String>,
    #[serde(rename = "dataFim")]
    pub end_date: Option<String>,
}

impl DateRange {
    pub fn new(start_date: Option<&str>, end_date: Option<&str>) -> Self {
        Self {
            start_date: start_date.map(str::to_string),
            end_date: end_date.map(str::to_string),
        }
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(start) = self.start_date.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("dataInicioSolicitacao", normalize_date(start)));
        }
        if let Some(end) = self.end_date.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("dataFimSolicitacao", normalize_date(end)));
        }
        pairs
    }
}

/// Authenticated access to the current-account statement API.
#[derive(Clone)]
pub struct StatementClient {
    api_url: String,
    dev_app_key: String,
    http_client: Client,
    tokens: TokenCache,
    matchers: BalanceMatchers,
    hooks: Hooks,
}

impl StatementClient {
    pub fn new(
        api_url: impl Into<String>,
        dev_app_key: impl Into<String>,
        http_client: Client,
        tokens: TokenCache,
    ) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            dev_app_key: dev_app_key.into(),
            http_client,
            tokens,
            matchers: BalanceMatchers::default(),
            hooks: Vec::new(),
        }
    }

    pub fn with_matchers(mut self, matchers: BalanceMatchers) -> Self {
        self.matchers = matchers;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn CallHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    fn statement_url(&self, branch: &str, account: &str) -> String {
        format!(
            "{}/extratos/v1/conta-corrente/agencia/{}/conta/{}",
            self.api_url, branch, account
        )
    }

    /// Fetch the transaction feed, in upstream order.
    pub async fn get_statement(
        &self,
        branch: &str,
        account: &str,
        range: &DateRange,
    ) -> UpstreamResult<Vec<TransactionEntry>> {
        Ok(self.get_statement_page(branch, account, range).await?.entries)
    }

    /// Like [`get_statement`](Self::get_statement), but keeps the page-level
    /// fields of the response for relaying.
    pub async fn get_statement_page(
        &self,
        branch: &str,
        account: &str,
        range: &DateRange,
    ) -> UpstreamResult<Statement> {
        timed(&self.hooks, "statement.get", self.fetch(branch, account, range)).await
    }

    /// Fetch the unfiltered feed and derive balances from it.
    pub async fn get_balance(&self, branch: &str, account: &str) -> UpstreamResult<DerivedBalance> {
        let entries = self
            .get_statement(branch, account, &DateRange::default())
            .await?;
        let derived = derive_balance(&entries, &self.matchers);

        info!(
            branch,
            account,
            entries = entries.len(),
            current = ?derived.current_balance,
            calculated = ?derived.calculated_balance,
            "balance derived from statement"
        );
        Ok(derived)
    }

    async fn fetch(
        &self,
        branch: &str,
        account: &str,
        range: &DateRange,
    ) -> UpstreamResult<Statement> {
        let token = self.tokens.get_token().await?;
        let url = self.statement_url(branch, account);

        let mut query = vec![("gw-dev-app-key", self.dev_app_key.clone())];
        query.extend(range.query_pairs());

        debug!(
            url = %url,
            branch,
            account,
            start = ?range.start_date,
            end = ?range.end_date,
            "requesting statement"
        );

        let response = self
            .http_client
            .get(&url)
            .query(&query)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("statement request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "statement request rejected");
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("reading statement response: {e}")))?;
        if body.trim().is_empty() {
            return Ok(Statement::default());
        }

        let statement: Statement = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::MalformedPayload(format!("statement response: {e}")))?;

        debug!(entries = statement.entries.len(), bytes = body.len(), "statement received");
        Ok(statement)
    }
}
