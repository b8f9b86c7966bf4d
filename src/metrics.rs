use portail_eau_rs::sensor::SensorState;
use portail_eau_rs::Error;
use prometheus::{Encoder, GaugeVec, TextEncoder};

lazy_static! {
    static ref VOLUME_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "water_meter_volume_liters",
            "latest meter index reported by the water portal (in L)",
        ),
        &["meter_id", "brand"],
    )
    .unwrap();
    static ref AVAILABLE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "water_meter_available",
            "1 when the last poll of the meter succeeded",
        ),
        &["meter_id", "brand"],
    )
    .unwrap();
    static ref LAST_READING_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "water_meter_last_reading_timestamp_seconds",
            "day of the latest meter index, as a unix timestamp",
        ),
        &["meter_id", "brand"],
    )
    .unwrap();
}

/// Feed a sensor snapshot to the Prometheus registry.
pub fn observe(state: &SensorState) {
    let labels = [state.meter_id.as_str(), state.attribution.as_str()];

    if let Some(volume) = state.state {
        VOLUME_GAUGE.with_label_values(&labels).set(volume);
    }

    AVAILABLE_GAUGE
        .with_label_values(&labels)
        .set(if state.available { 1.0 } else { 0.0 });

    if let Some(timestamp) = state
        .last_reading
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc().timestamp())
    {
        LAST_READING_GAUGE
            .with_label_values(&labels)
            .set(timestamp as f64);
    }
}

/// Drop the series of an unloaded sensor.
pub fn forget(state: &SensorState) {
    let labels = [state.meter_id.as_str(), state.attribution.as_str()];

    for gauge in [&*VOLUME_GAUGE, &*AVAILABLE_GAUGE, &*LAST_READING_GAUGE] {
        if let Err(e) = gauge.remove_label_values(&labels) {
            log::trace!("no series to remove for meter {}: {}", state.meter_id, e);
        }
    }
}

/// Read metrics from Prometheus exporter registry.
pub async fn read() -> Result<String, Error> {
    // Gather the metrics.
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(Error::InternalError))?;
    String::from_utf8(buffer).or(Err(Error::InternalError))
}
