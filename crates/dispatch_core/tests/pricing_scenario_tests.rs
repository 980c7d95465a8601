use dispatch_core::model::{GeoPoint, Location, VehicleClass};
use dispatch_core::test_helpers::TestHarness;
use dispatch_core::BookingRequest;

#[test]
fn one_degree_sedan_trip_at_off_peak_weekday_hour() {
    let harness = TestHarness::new();
    let fare = harness
        .service
        .quote(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0), VehicleClass::Sedan)
        .expect("quote");
    assert_eq!(fare, 171.5);
}

#[tokio::test]
async fn stored_price_is_never_below_the_computed_fare() {
    let harness = TestHarness::new();
    let rider = harness.rider("rita");
    let drivers = [
        harness.driver("dora", GeoPoint::new(0.001, 0.0)),
        harness.driver("dave", GeoPoint::new(0.002, 0.0)),
    ];
    let pickup = Location::new("origin", GeoPoint::new(0.0, 0.0));
    let dropoff = Location::new("one degree east", GeoPoint::new(0.0, 1.0));

    let lowball = harness
        .service
        .create_booking(
            BookingRequest::new(rider, pickup.clone(), dropoff.clone())
                .with_driver(drivers[0].0, drivers[0].1)
                .with_price(20.0),
        )
        .await
        .expect("lowball");
    assert_eq!(lowball.price, 171.5);

    let generous = harness
        .service
        .create_booking(
            BookingRequest::new(rider, pickup, dropoff)
                .with_driver(drivers[1].0, drivers[1].1)
                .with_price(200.0),
        )
        .await
        .expect("generous");
    assert_eq!(generous.price, 200.0);
}

#[tokio::test]
async fn non_positive_offer_is_rejected_without_holding_the_driver() {
    let harness = TestHarness::new();
    let rider = harness.rider("rita");
    let (driver, vehicle) = harness.driver("dora", GeoPoint::new(52.52, 13.405));

    let err = harness
        .service
        .create_booking(harness.request(rider).with_driver(driver, vehicle).with_price(-3.0))
        .await
        .expect_err("negative offer");
    assert!(matches!(err, dispatch_core::DispatchError::Validation(_)));
    assert!(harness.fleet.driver(driver).expect("driver").available);
}
