//! Accumulates, deduplicates and orders card payloads for one response turn.

use std::collections::HashSet;

use chatstream_protocol::protocol::Card;
use tracing::debug;

/// Write-once-per-id accumulator with stable index ordering.
///
/// Cards stream in across multiple discrete event deliveries for the same
/// turn, so the handler must outlive any single call site; the owning
/// registry (`registry::HandlerRegistry`) keys instances by
/// (conversation, chat) and disposes them when the turn completes.
pub struct CardsHandler {
    cards: Vec<Card>,
    seen_ids: HashSet<String>,
}

impl CardsHandler {
    pub fn new() -> Self {
        Self {
            cards: Vec::new(),
            seen_ids: HashSet::new(),
        }
    }

    /// Merge a batch. A card whose `id` was already seen is skipped
    /// entirely: first-seen wins, no in-place update. Cards without ids
    /// always insert. Returns the number of cards accepted.
    pub fn add_cards<I>(&mut self, new_cards: I) -> usize
    where
        I: IntoIterator<Item = Card>,
    {
        let mut accepted = 0;
        for card in new_cards {
            if let Some(id) = &card.id {
                if !self.seen_ids.insert(id.clone()) {
                    debug!(id, "skipping duplicate card");
                    continue;
                }
            }
            self.cards.push(card);
            accepted += 1;
        }
        if accepted > 0 {
            self.sort_if_indexed();
        }
        accepted
    }

    /// Convenience for single-card deliveries.
    pub fn add_card(&mut self, card: Card) -> usize {
        self.add_cards(std::iter::once(card))
    }

    /// Ordering rule: the moment any accumulated card carries an index, the
    /// whole collection sorts by parsed index ascending, unindexed cards
    /// last; ties keep insertion order. With no indexed card at all, pure
    /// insertion order stands.
    fn sort_if_indexed(&mut self) {
        if self.cards.iter().any(|c| c.index.is_some()) {
            self.cards.sort_by_key(Card::sort_key);
        }
    }

    /// Defensive copy of the current ordered collection.
    pub fn cards(&self) -> Vec<Card> {
        self.cards.clone()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

impl Default for CardsHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn card(id: &str, index: Option<&str>) -> Card {
        serde_json::from_value(match index {
            Some(i) => json!({ "id": id, "index": i }),
            None => json!({ "id": id }),
        })
        .expect("card")
    }

    fn ids(handler: &CardsHandler) -> Vec<String> {
        handler
            .cards()
            .into_iter()
            .map(|c| c.id.unwrap_or_default())
            .collect()
    }

    #[test]
    fn duplicate_ids_are_skipped_first_seen_wins() {
        let mut handler = CardsHandler::new();
        handler.add_cards([card("x", Some("2")), card("y", Some("1"))]);
        let accepted = handler.add_card(card("x", Some("2")));
        assert_eq!(accepted, 0);
        assert_eq!(ids(&handler), vec!["y", "x"]);
    }

    #[test]
    fn unindexed_cards_sort_after_indexed_ones() {
        let mut handler = CardsHandler::new();
        handler.add_cards([card("late", None), card("first", Some("0"))]);
        assert_eq!(ids(&handler), vec!["first", "late"]);
    }

    #[test]
    fn insertion_order_is_kept_when_nothing_is_indexed() {
        let mut handler = CardsHandler::new();
        handler.add_cards([card("b", None), card("a", None), card("c", None)]);
        assert_eq!(ids(&handler), vec!["b", "a", "c"]);
    }

    #[test]
    fn equal_indices_preserve_relative_insertion_order() {
        let mut handler = CardsHandler::new();
        handler.add_cards([card("one", Some("5")), card("two", Some("5"))]);
        handler.add_card(card("zero", Some("1")));
        assert_eq!(ids(&handler), vec!["zero", "one", "two"]);
    }

    #[test]
    fn unparsable_index_is_treated_as_last() {
        let mut handler = CardsHandler::new();
        handler.add_cards([card("odd", Some("soon")), card("ok", Some("3"))]);
        assert_eq!(ids(&handler), vec!["ok", "odd"]);
    }

    #[test]
    fn id_less_cards_always_insert() {
        let mut handler = CardsHandler::new();
        let anon: Card = serde_json::from_value(json!({ "title": "t" })).expect("card");
        handler.add_card(anon.clone());
        handler.add_card(anon);
        assert_eq!(handler.len(), 2);
    }
}
