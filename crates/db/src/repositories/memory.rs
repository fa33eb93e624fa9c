use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use devis_core::clock::{SharedClock, SystemClock};
use devis_core::domain::client::{Client, ClientDraft, ClientId};
use devis_core::domain::quote::{
    price_lines, LineItem, LineItemDraft, LineItemId, PricedLine, Quote, QuoteDraft, QuoteFilter,
    QuoteId, QuoteStatus, QuoteUpdate,
};
use devis_core::numbering::{next_quote_number, NumberingPeriod};
use devis_core::pricing::pre_tax_total;

use super::{ClientRepository, QuoteRepository, RepositoryError};

#[derive(Default)]
struct MemoryState {
    clients: BTreeMap<i64, Client>,
    quotes: BTreeMap<i64, Quote>,
    lines: BTreeMap<i64, LineItem>,
    last_client_id: i64,
    last_quote_id: i64,
    last_line_id: i64,
}

impl MemoryState {
    fn quote_mut(&mut self, id: QuoteId) -> Result<&mut Quote, RepositoryError> {
        self.quotes.get_mut(&id.0).ok_or_else(|| RepositoryError::NotFound(format!("quote {id}")))
    }

    fn insert_lines(&mut self, id: QuoteId, lines: &[PricedLine]) -> Vec<LineItem> {
        lines
            .iter()
            .map(|line| {
                self.last_line_id += 1;
                let item = LineItem {
                    id: LineItemId(self.last_line_id),
                    quote_id: id,
                    description: line.description.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    amount: line.amount,
                };
                self.lines.insert(item.id.0, item.clone());
                item
            })
            .collect()
    }

    fn recompute(&mut self, id: QuoteId) -> Result<Decimal, RepositoryError> {
        let total = pre_tax_total(
            self.lines.values().filter(|line| line.quote_id == id).map(|line| line.amount),
        )?;
        self.quote_mut(id)?.pre_tax_total = total;
        Ok(total)
    }

    fn sorted_quotes<F>(&self, keep: F) -> Vec<Quote>
    where
        F: Fn(&Quote) -> bool,
    {
        let mut quotes: Vec<Quote> = self.quotes.values().filter(|quote| keep(quote)).cloned().collect();
        quotes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        quotes
    }
}

/// Shared in-process state behind the in-memory repositories. Every mutation
/// holds the write lock for its whole duration.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    clock: SharedClock,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryStore {
    pub fn with_clock(clock: SharedClock) -> Self {
        Self { state: Arc::new(RwLock::new(MemoryState::default())), clock }
    }

    pub fn clients(&self) -> InMemoryClientRepository {
        InMemoryClientRepository { store: self.clone() }
    }

    pub fn quotes(&self) -> InMemoryQuoteRepository {
        InMemoryQuoteRepository { store: self.clone() }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryClientRepository {
    store: InMemoryStore,
}

#[async_trait::async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn create(&self, draft: ClientDraft) -> Result<Client, RepositoryError> {
        let draft = draft.normalized()?;
        let mut state = self.store.state.write().await;

        state.last_client_id += 1;
        let client = Client {
            id: ClientId(state.last_client_id),
            name: draft.name,
            email: draft.email,
            phone: draft.phone,
            address: draft.address,
            notes: draft.notes,
            created_at: self.store.clock.now(),
            created_by: draft.created_by,
        };
        state.clients.insert(client.id.0, client.clone());
        Ok(client)
    }

    async fn update(&self, id: ClientId, draft: ClientDraft) -> Result<Client, RepositoryError> {
        let draft = draft.normalized()?;
        let mut state = self.store.state.write().await;

        let client = state
            .clients
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("client {id}")))?;
        client.name = draft.name;
        client.email = draft.email;
        client.phone = draft.phone;
        client.address = draft.address;
        client.notes = draft.notes;
        Ok(client.clone())
    }

    async fn find_by_id(&self, id: ClientId) -> Result<Option<Client>, RepositoryError> {
        let state = self.store.state.read().await;
        Ok(state.clients.get(&id.0).cloned())
    }

    async fn list(&self) -> Result<Vec<Client>, RepositoryError> {
        let state = self.store.state.read().await;
        let mut clients: Vec<Client> = state.clients.values().cloned().collect();
        clients.sort_by(|a, b| {
            a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id))
        });
        Ok(clients)
    }

    async fn delete(&self, id: ClientId) -> Result<(), RepositoryError> {
        let mut state = self.store.state.write().await;
        if !state.clients.contains_key(&id.0) {
            return Err(RepositoryError::NotFound(format!("client {id}")));
        }

        let quote_count = state.quotes.values().filter(|quote| quote.client_id == id).count();
        if quote_count > 0 {
            return Err(RepositoryError::Conflict(format!(
                "client {id} still has {quote_count} quote(s) and cannot be deleted"
            )));
        }

        state.clients.remove(&id.0);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryQuoteRepository {
    store: InMemoryStore,
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn create(&self, draft: QuoteDraft) -> Result<Quote, RepositoryError> {
        let lines = price_lines(&draft.lines)?;
        let mut state = self.store.state.write().await;

        if !state.clients.contains_key(&draft.client_id.0) {
            return Err(RepositoryError::NotFound(format!("client {}", draft.client_id)));
        }

        let created_at = self.store.clock.now();
        let period = NumberingPeriod::containing(created_at);
        let issued: Vec<String> = state.quotes.values().map(|quote| quote.number.to_string()).collect();
        let number = next_quote_number(period, issued.iter().map(String::as_str));

        state.last_quote_id += 1;
        let id = QuoteId(state.last_quote_id);
        state.quotes.insert(
            id.0,
            Quote {
                id,
                number,
                client_id: draft.client_id,
                created_at,
                valid_until: draft.valid_until_or_default(created_at),
                pre_tax_total: Decimal::ZERO,
                payment_terms: draft.payment_terms.trim().to_owned(),
                notes: draft.notes.clone(),
                status: QuoteStatus::Draft,
                created_by: draft.created_by.clone(),
            },
        );
        state.insert_lines(id, &lines);
        state.recompute(id)?;

        state.quotes.get(&id.0).cloned().ok_or_else(|| RepositoryError::NotFound(format!("quote {id}")))
    }

    async fn find_by_id(&self, id: QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let state = self.store.state.read().await;
        Ok(state.quotes.get(&id.0).cloned())
    }

    async fn list(&self, filter: QuoteFilter) -> Result<Vec<Quote>, RepositoryError> {
        let state = self.store.state.read().await;
        Ok(state.sorted_quotes(|quote| filter.matches(quote.status)))
    }

    async fn list_for_client(&self, client_id: ClientId) -> Result<Vec<Quote>, RepositoryError> {
        let state = self.store.state.read().await;
        Ok(state.sorted_quotes(|quote| quote.client_id == client_id))
    }

    async fn update(&self, id: QuoteId, update: QuoteUpdate) -> Result<Quote, RepositoryError> {
        let lines = update.lines.as_deref().map(price_lines).transpose()?;
        let mut state = self.store.state.write().await;

        if !state.clients.contains_key(&update.client_id.0) {
            return Err(RepositoryError::NotFound(format!("client {}", update.client_id)));
        }

        let quote = state.quote_mut(id)?;
        quote.client_id = update.client_id;
        quote.valid_until = update.valid_until;
        quote.payment_terms = update.payment_terms.trim().to_owned();
        quote.notes = update.notes;

        if let Some(lines) = lines {
            state.lines.retain(|_, line| line.quote_id != id);
            state.insert_lines(id, &lines);
            state.recompute(id)?;
        }

        state.quote_mut(id).map(|quote| quote.clone())
    }

    async fn set_status(&self, id: QuoteId, status: QuoteStatus) -> Result<Quote, RepositoryError> {
        let mut state = self.store.state.write().await;
        let quote = state.quote_mut(id)?;
        quote.status = status;
        Ok(quote.clone())
    }

    async fn delete(&self, id: QuoteId) -> Result<(), RepositoryError> {
        let mut state = self.store.state.write().await;
        if state.quotes.remove(&id.0).is_none() {
            return Err(RepositoryError::NotFound(format!("quote {id}")));
        }
        state.lines.retain(|_, line| line.quote_id != id);
        Ok(())
    }

    async fn lines(&self, id: QuoteId) -> Result<Vec<LineItem>, RepositoryError> {
        let state = self.store.state.read().await;
        Ok(state.lines.values().filter(|line| line.quote_id == id).cloned().collect())
    }

    async fn add_line(&self, id: QuoteId, line: LineItemDraft) -> Result<LineItem, RepositoryError> {
        let priced = line.price()?;
        let mut state = self.store.state.write().await;

        state.quote_mut(id)?;
        let mut inserted = state.insert_lines(id, std::slice::from_ref(&priced));
        state.recompute(id)?;

        inserted.pop().ok_or_else(|| RepositoryError::Decode("line insert returned no row".to_owned()))
    }

    async fn update_line(
        &self,
        id: QuoteId,
        line_id: LineItemId,
        line: LineItemDraft,
    ) -> Result<LineItem, RepositoryError> {
        let priced = line.price()?;
        let mut state = self.store.state.write().await;

        state.quote_mut(id)?;
        let item = state
            .lines
            .get_mut(&line_id.0)
            .filter(|item| item.quote_id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("line {line_id} of quote {id}")))?;
        item.description = priced.description;
        item.quantity = priced.quantity;
        item.unit_price = priced.unit_price;
        item.amount = priced.amount;
        let updated = item.clone();

        state.recompute(id)?;
        Ok(updated)
    }

    async fn remove_line(&self, id: QuoteId, line_id: LineItemId) -> Result<(), RepositoryError> {
        let mut state = self.store.state.write().await;

        state.quote_mut(id)?;
        let belongs = state.lines.get(&line_id.0).is_some_and(|item| item.quote_id == id);
        if !belongs {
            return Err(RepositoryError::NotFound(format!("line {line_id} of quote {id}")));
        }
        state.lines.remove(&line_id.0);

        state.recompute(id)?;
        Ok(())
    }

    async fn replace_lines(
        &self,
        id: QuoteId,
        lines: Vec<LineItemDraft>,
    ) -> Result<Vec<LineItem>, RepositoryError> {
        let priced = price_lines(&lines)?;
        let mut state = self.store.state.write().await;

        state.quote_mut(id)?;
        state.lines.retain(|_, line| line.quote_id != id);
        let inserted = state.insert_lines(id, &priced);
        state.recompute(id)?;

        Ok(inserted)
    }

    async fn recompute_total(&self, id: QuoteId) -> Result<Decimal, RepositoryError> {
        let mut state = self.store.state.write().await;
        state.recompute(id)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use devis_core::clock::FixedClock;
    use devis_core::domain::client::ClientDraft;
    use devis_core::domain::quote::{LineItemDraft, QuoteDraft, QuoteFilter, QuoteStatus};
    use devis_core::stats::ClientQuoteStats;

    use super::InMemoryStore;
    use crate::repositories::{ClientRepository, QuoteRepository, RepositoryError};

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).expect("valid decimal")
    }

    fn store() -> (InMemoryStore, FixedClock) {
        let clock =
            FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).single().expect("instant"));
        (InMemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    fn client_draft(name: &str) -> ClientDraft {
        ClientDraft {
            name: name.to_string(),
            email: "contact@example.fr".to_string(),
            ..ClientDraft::default()
        }
    }

    fn quote_draft(client_id: devis_core::domain::client::ClientId, lines: Vec<LineItemDraft>) -> QuoteDraft {
        QuoteDraft {
            client_id,
            valid_until: None,
            payment_terms: String::new(),
            notes: None,
            created_by: None,
            lines,
        }
    }

    #[tokio::test]
    async fn in_memory_quotes_follow_numbering_and_totals() {
        let (store, clock) = store();
        let client = store.clients().create(client_draft("Plomberie Noël")).await.expect("client");
        let quotes = store.quotes();

        let first = quotes
            .create(quote_draft(
                client.id,
                vec![LineItemDraft { description: "Raccord".into(), quantity: 3, unit_price: dec("19.99") }],
            ))
            .await
            .expect("create");
        assert_eq!(first.number.to_string(), "DEV-202610-0001");
        assert_eq!(first.pre_tax_total, dec("59.97"));

        let second = quotes.create(quote_draft(client.id, Vec::new())).await.expect("create");
        assert_eq!(second.number.to_string(), "DEV-202610-0002");
        assert_eq!(second.pre_tax_total.to_string(), "0.00");

        clock.set(Utc.with_ymd_and_hms(2026, 11, 2, 10, 0, 0).single().expect("instant"));
        let third = quotes.create(quote_draft(client.id, Vec::new())).await.expect("create");
        assert_eq!(third.number.to_string(), "DEV-202611-0001");

        let line = quotes
            .add_line(second.id, LineItemDraft { description: "Main d'oeuvre".into(), quantity: 2, unit_price: dec("45") })
            .await
            .expect("add line");
        assert_eq!(quotes.recompute_total(second.id).await.expect("recompute"), dec("90.00"));
        quotes.remove_line(second.id, line.id).await.expect("remove");
        let second = quotes.find_by_id(second.id).await.expect("find").expect("quote");
        assert_eq!(second.pre_tax_total, Decimal::ZERO);

        let open = quotes.list(QuoteFilter::Open).await.expect("list");
        assert_eq!(open.first().map(|quote| quote.id), Some(third.id));
    }

    #[tokio::test]
    async fn in_memory_client_delete_guard_and_stats() {
        let (store, _clock) = store();
        let clients = store.clients();
        let quotes = store.quotes();
        let client = clients.create(client_draft("Toiture Marchand")).await.expect("client");

        let accepted = quotes
            .create(quote_draft(
                client.id,
                vec![LineItemDraft { description: "Couverture".into(), quantity: 1, unit_price: dec("100") }],
            ))
            .await
            .expect("create");
        quotes.set_status(accepted.id, QuoteStatus::Accepted).await.expect("accept");
        quotes.create(quote_draft(client.id, Vec::new())).await.expect("create");

        let stats = ClientQuoteStats::from_quotes(&quotes.list_for_client(client.id).await.expect("list"));
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.accepted_total, dec("120.00"));

        let blocked = clients.delete(client.id).await.expect_err("guarded");
        assert!(matches!(blocked, RepositoryError::Conflict(_)));

        for quote in quotes.list_for_client(client.id).await.expect("list") {
            quotes.delete(quote.id).await.expect("delete quote");
        }
        clients.delete(client.id).await.expect("delete client");
        assert!(clients.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn in_memory_validation_matches_sql_rules() {
        let (store, _clock) = store();
        let blank = store.clients().create(client_draft(" ")).await.expect_err("blank");
        assert!(matches!(blank, RepositoryError::Validation(_)));

        let client = store.clients().create(client_draft("Martin")).await.expect("client");
        let precise = store
            .quotes()
            .create(quote_draft(
                client.id,
                vec![LineItemDraft { description: "Vis".into(), quantity: 1, unit_price: dec("0.125") }],
            ))
            .await
            .expect_err("three decimals");
        assert!(matches!(precise, RepositoryError::Validation(_)));
    }
}
