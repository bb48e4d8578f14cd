mod common;

use rewards_collector::entities::{node_provider_daily_summary, prelude::*};
use rewards_collector::jobs::rewards_collection::{
    CollectionError, CollectionSettings, RewardsCollectionService,
};
use rewards_collector::models::collection::CollectionStats;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::{
    FixtureGenerator, day, metric_snapshot, setup_test_db, summary_snapshot, test_db, test_prices,
    write_provider_csv,
};

fn collection_service(
    generator: Arc<FixtureGenerator>,
    database_url: &str,
    cleanup_output: bool,
) -> RewardsCollectionService {
    let settings = CollectionSettings {
        database_url: database_url.to_string(),
        cleanup_output,
    };
    RewardsCollectionService::new(settings, generator, test_prices(day(10, 1, 2024), 7.0))
}

/// p1 reports two nodes for one day, p2 has a directory but no metrics file
fn two_provider_fixture(root: &TempDir) {
    write_provider_csv(
        root.path(),
        "p1",
        &[
            "n1,10-01-2024,Assigned,type3.1,europe,dc1,1.0,0.0,1000,1000,subnet-a,10,0",
            "n2,10-01-2024,Assigned,type3.1,europe,dc1,0.8,0.2,1000,800,subnet-a,5,5",
        ],
    );
    std::fs::create_dir_all(root.path().join("p2")).unwrap();
}

#[tokio::test]
async fn test_collection_cycle_end_to_end() {
    let fixture = TempDir::new().unwrap();
    two_provider_fixture(&fixture);
    let output = TempDir::new().unwrap();
    let db = test_db();
    let generator = Arc::new(FixtureGenerator::new(fixture.path(), output.path()));

    let stats = collection_service(generator, &db.url, false)
        .run_collection_cycle()
        .await
        .unwrap();

    assert_eq!(
        stats,
        CollectionStats {
            providers_processed: 1,
            providers_failed: 1,
            node_metrics: 2,
            summaries_generated: 1,
            output_path: output.path().join("rewards_0"),
        }
    );

    let writer = setup_test_db(&db).await.unwrap();
    let summary = NodeProviderDailySummary::find()
        .filter(node_provider_daily_summary::Column::NodeProviderId.eq("p1"))
        .one(writer.connection())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.day_utc, day(10, 1, 2024));
    assert_eq!(summary.total_nodes, 2);
    assert_eq!(summary.assigned_nodes, 2);
    assert_eq!(summary.total_blocks_proposed, 15);
    assert_eq!(summary.total_blocks_failed, 5);
    assert_eq!(summary.total_failure_rate, 25.0);
    assert_eq!(summary.expected_rewards_xdr_permyriad, 2000);
    assert_eq!(summary.actual_rewards_xdr_permyriad, 1800);
    assert_eq!(summary.total_reduction_xdr_permyriad, 200);

    let rates = XdrIcpConversionRates::find().all(writer.connection()).await.unwrap();
    assert_eq!(rates.len(), 1);
    assert_eq!(rates[0].day_utc, day(10, 1, 2024));
    assert_eq!(rates[0].icp_to_usd, 7.0);
    assert!((rates[0].xdr_to_icp - 0.2).abs() < 1e-12);

    assert_eq!(writer.get_latest_data_date().await.unwrap(), Some(day(10, 1, 2024)));
}

#[tokio::test]
async fn test_repeated_cycles_do_not_duplicate_rows() {
    let fixture = TempDir::new().unwrap();
    two_provider_fixture(&fixture);
    let output = TempDir::new().unwrap();
    let db = test_db();
    let generator = Arc::new(FixtureGenerator::new(fixture.path(), output.path()));
    let service = collection_service(generator, &db.url, true);

    let first = service.run_collection_cycle().await.unwrap();
    let writer = setup_test_db(&db).await.unwrap();
    let metrics_before = metric_snapshot(writer.connection()).await;
    let summaries_before = summary_snapshot(writer.connection()).await;
    writer.close().await.unwrap();

    let second = service.run_collection_cycle().await.unwrap();
    assert_ne!(first.output_path, second.output_path);
    assert_eq!(
        (first.providers_processed, first.providers_failed, first.node_metrics, first.summaries_generated),
        (second.providers_processed, second.providers_failed, second.node_metrics, second.summaries_generated)
    );

    let writer = setup_test_db(&db).await.unwrap();
    let db_conn = writer.connection();
    assert_eq!(metrics_before.len(), 2);
    assert_eq!(summaries_before.len(), 1);
    assert_eq!(metric_snapshot(db_conn).await, metrics_before);
    assert_eq!(summary_snapshot(db_conn).await, summaries_before);
    assert_eq!(XdrIcpConversionRates::find().count(db_conn).await.unwrap(), 1);
}

#[tokio::test]
async fn test_cleanup_removes_output_tree() {
    let fixture = TempDir::new().unwrap();
    two_provider_fixture(&fixture);
    let output = TempDir::new().unwrap();
    let db = test_db();
    let generator = Arc::new(FixtureGenerator::new(fixture.path(), output.path()));

    assert!(collection_service(generator, &db.url, true).run_once().await);

    let leftovers = std::fs::read_dir(output.path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_output_is_kept_without_cleanup() {
    let fixture = TempDir::new().unwrap();
    two_provider_fixture(&fixture);
    let output = TempDir::new().unwrap();
    let db = test_db();
    let generator = Arc::new(FixtureGenerator::new(fixture.path(), output.path()));

    assert!(collection_service(generator, &db.url, false).run_once().await);

    assert!(output.path().join("rewards_0/p1/node_metrics_by_node.csv").exists());
}

#[tokio::test]
async fn test_no_providers_fails_cycle() {
    let fixture = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let db = test_db();
    let generator = Arc::new(FixtureGenerator::new(fixture.path(), output.path()));
    let service = collection_service(generator, &db.url, true);

    let result = service.run_collection_cycle().await;

    assert!(matches!(result, Err(CollectionError::NoProviders(_))));
    assert!(!service.run_once().await);
}

#[tokio::test]
async fn test_provider_with_only_bad_rows_counts_as_failed() {
    let fixture = TempDir::new().unwrap();
    write_provider_csv(
        fixture.path(),
        "p1",
        &["n1,10-01-2024,Assigned,type3.1,europe,dc1,1.0,0.0,1000,1000,subnet-a,ten,0"],
    );
    write_provider_csv(
        fixture.path(),
        "p2",
        &["n2,11-01-2024,Unassigned,type1,asia,dc2,1.0,0.0,500,500,,0,0"],
    );
    let output = TempDir::new().unwrap();
    let db = test_db();
    let generator = Arc::new(FixtureGenerator::new(fixture.path(), output.path()));

    let stats = collection_service(generator, &db.url, true)
        .run_collection_cycle()
        .await
        .unwrap();

    assert_eq!(stats.providers_processed, 1);
    assert_eq!(stats.providers_failed, 1);
    assert_eq!(stats.node_metrics, 1);
    assert_eq!(stats.summaries_generated, 1);

    let writer = setup_test_db(&db).await.unwrap();
    let summary = NodeProviderDailySummary::find()
        .one(writer.connection())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.node_provider_id, "p2");
    assert_eq!(summary.unassigned_nodes, 1);
    assert_eq!(summary.total_failure_rate, 0.0);
}
