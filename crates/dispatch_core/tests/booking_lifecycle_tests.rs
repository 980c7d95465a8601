mod support;

use dispatch_core::booking::{Actor, BookingStatus};
use dispatch_core::clock::Clock;
use dispatch_core::model::GeoPoint;
use dispatch_core::store::BookingQuery;
use dispatch_core::test_helpers::TestHarness;
use dispatch_core::DispatchError;
use proptest::prelude::*;
use support::{drive_to_completion, is_valid_walk};

#[tokio::test]
async fn completed_booking_walks_the_table_and_frees_the_driver() {
    let harness = TestHarness::new();
    let (driver, vehicle) = harness.driver("dora", GeoPoint::new(52.52, 13.405));
    let rider = harness.rider("rita");
    let booking = harness.immediate_booking(rider, driver, vehicle).await;

    let done = drive_to_completion(&harness, &booking).await;
    assert_eq!(done.status, BookingStatus::Completed);
    assert!(is_valid_walk(&done.status_walk()));
    assert!(harness.fleet.driver(driver).expect("driver").available);
    assert!(harness.fleet.vehicle(vehicle).expect("vehicle").available);
}

#[tokio::test]
async fn cancelling_a_scheduled_booking_frees_its_claimed_driver() {
    let harness = TestHarness::new();
    let (driver, vehicle) = harness.driver("dora", GeoPoint::new(52.52, 13.405));
    let rider = harness.rider("rita");
    let at = harness.clock.now() + chrono::Duration::minutes(30);
    let booking = harness
        .future_booking(rider, Some((driver, vehicle)), at)
        .await;
    assert_eq!(booking.status, BookingStatus::Scheduled);
    assert!(!harness.fleet.driver(driver).expect("driver").available);

    let cancelled = harness
        .service
        .cancel_booking(booking.id, Actor::Rider(rider))
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(harness.fleet.driver(driver).expect("driver").available);
}

#[tokio::test]
async fn driver_job_list_and_job_status_updates() {
    let harness = TestHarness::new();
    let (driver, vehicle) = harness.driver("dora", GeoPoint::new(52.52, 13.405));
    let (other, _) = harness.driver("sam", GeoPoint::new(52.53, 13.41));
    let rider = harness.rider("rita");
    let booking = harness.immediate_booking(rider, driver, vehicle).await;

    let jobs = harness.service.driver_jobs(driver).await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert!(harness.service.driver_jobs(other).await.expect("jobs").is_empty());

    let err = harness
        .service
        .update_job_status(booking.id, BookingStatus::EnRoute, other)
        .await
        .expect_err("other driver");
    assert!(matches!(err, DispatchError::Unauthorized(_)));

    harness
        .service
        .update_job_status(booking.id, BookingStatus::EnRoute, driver)
        .await
        .expect("own job");

    let err = harness
        .service
        .set_driver_availability(driver, true, Actor::Driver(driver))
        .expect_err("still on a job");
    assert!(matches!(err, DispatchError::Conflict(_)));
}

#[tokio::test]
async fn rider_listing_is_newest_first() {
    let harness = TestHarness::new();
    let drivers = support::driver_row(&harness, 2);
    let rider = harness.rider("rita");
    let first = harness
        .immediate_booking(rider, drivers[0].0, drivers[0].1)
        .await;
    harness.clock.advance(chrono::Duration::minutes(1));
    let second = harness
        .immediate_booking(rider, drivers[1].0, drivers[1].1)
        .await;

    let listed = harness
        .service
        .bookings(BookingQuery::Rider(rider))
        .await
        .expect("list");
    let ids: Vec<_> = listed.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Target(BookingStatus),
    Cancel,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Target(BookingStatus::EnRoute)),
        Just(Step::Target(BookingStatus::GoodsCollected)),
        Just(Step::Target(BookingStatus::Completed)),
        Just(Step::Target(BookingStatus::Assigned)),
        Just(Step::Cancel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever the driver and rider try, the recorded walk stays on the
    /// table and the driver is busy exactly while the booking is open.
    #[test]
    fn arbitrary_event_sequences_keep_walk_and_availability_consistent(
        steps in proptest::collection::vec(step_strategy(), 1..8)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let harness = TestHarness::new();
            let (driver, vehicle) = harness.driver("dora", GeoPoint::new(52.52, 13.405));
            let rider = harness.rider("rita");
            let booking = harness.immediate_booking(rider, driver, vehicle).await;

            for step in steps {
                let result = match step {
                    Step::Target(target) => {
                        harness
                            .service
                            .update_status(booking.id, target, Actor::Driver(driver))
                            .await
                    }
                    Step::Cancel => {
                        harness
                            .service
                            .cancel_booking(booking.id, Actor::Rider(rider))
                            .await
                    }
                };
                if let Err(err) = result {
                    assert!(
                        matches!(
                            err,
                            DispatchError::InvalidTransition { .. } | DispatchError::Unauthorized(_)
                        ),
                        "unexpected error {err:?}"
                    );
                }

                let current = harness.service.booking(booking.id).await.expect("booking");
                assert!(is_valid_walk(&current.status_walk()));
                let available = harness.fleet.driver(driver).expect("driver").available;
                assert_eq!(available, current.status.is_terminal());
            }
        });
    }
}
