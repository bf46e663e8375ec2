//! Unit Tests for the Ranking Table

use fake::faker::name::en::Name;
use fake::Fake;
use portfolio_core::valuation::{RankingEntry, RankingPublisher, RankingTable};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn entry(user_id: &str, value: Decimal) -> RankingEntry {
    let name: String = Name().fake();
    RankingEntry::new(user_id, name, value, Decimal::ZERO)
}

#[tokio::test]
async fn test_rank_orders_by_value_descending() {
    let table = RankingTable::new();
    table.upsert(entry("A", dec!(10500))).await;
    table.upsert(entry("B", dec!(12000))).await;
    table.upsert(entry("C", dec!(9800))).await;

    let ranked = table.rank().await;
    let order: Vec<(&str, usize)> = ranked.iter().map(|e| (e.user_id.as_str(), e.position)).collect();

    assert_eq!(order, vec![("B", 1), ("A", 2), ("C", 3)]);
    assert_eq!(table.position_of("A").await, Some(2));
}

#[tokio::test]
async fn test_ties_keep_insertion_order() {
    let table = RankingTable::new();
    table.upsert(entry("first", dec!(10000))).await;
    table.upsert(entry("second", dec!(10000))).await;
    table.upsert(entry("top", dec!(11000))).await;

    let ranked = table.rank().await;

    assert_eq!(ranked[0].user_id, "top");
    assert_eq!(ranked[1].user_id, "first");
    assert_eq!(ranked[2].user_id, "second");
}

#[tokio::test]
async fn test_upsert_replaces_existing_entry() {
    let table = RankingTable::new();
    table.upsert(entry("A", dec!(10000))).await;
    table.upsert(entry("B", dec!(11000))).await;
    assert_eq!(table.position_of("A").await, Some(2));

    table
        .upsert(RankingEntry::new("A", "Ada", dec!(12500), dec!(25)))
        .await;

    assert_eq!(table.len().await, 2);
    let standing = table.standing("A").await.unwrap();
    assert_eq!(standing.position, 1);
    assert_eq!(standing.portfolio_value, dec!(12500));
    assert_eq!(standing.daily_change_percent, dec!(25));
    assert_eq!(standing.label(), "#1. Ada");
}

#[tokio::test]
async fn test_top_truncates_ranked_view() {
    let table = RankingTable::new();
    for i in 0..25 {
        table.upsert(entry(&format!("user-{}", i), Decimal::from(10000 + i))).await;
    }

    let top = table.top(20).await;

    assert_eq!(top.len(), 20);
    assert_eq!(top[0].user_id, "user-24");
    assert_eq!(top[19].position, 20);
    assert_eq!(table.top(100).await.len(), 25);
}

#[tokio::test]
async fn test_unknown_user_has_no_position() {
    let table = RankingTable::new();
    assert!(table.is_empty().await);
    assert_eq!(table.position_of("ghost").await, None);
}

#[tokio::test]
async fn test_publish_upserts() {
    let table = RankingTable::new();

    table.publish(entry("A", dec!(10000))).await;
    table.publish(entry("A", dec!(10100))).await;

    assert_eq!(table.len().await, 1);
    assert_eq!(table.standing("A").await.unwrap().portfolio_value, dec!(10100));
}

#[test]
fn test_unranked_label_is_bare_name() {
    let entry = RankingEntry::new("A", "Ada", dec!(1), Decimal::ZERO);
    assert_eq!(entry.position, 0);
    assert_eq!(entry.label(), "Ada");
}
