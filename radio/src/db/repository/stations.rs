//! Station payload persistence: a transactional publish (insert a new
//! immutable payload + its stations, then swap the `station_state`
//! pointer) followed by best-effort cleanup of the payload it replaced
//! (§6, §7).

use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::models::{NewStationRow, PayloadRow, StationRow};
use crate::models::station::{Station, StationsPayload};

const INSERT_BATCH_SIZE: usize = 500;

/// Inserts `payload` as a new immutable snapshot, publishes it by swapping
/// the `station_state` pointer, and deletes the payload it replaced. The
/// insert + pointer swap happen in one transaction; the swapped-out
/// payload is deleted afterwards so a concurrent reader never observes a
/// missing payload mid-publish.
pub async fn persist(pool: &PgPool, payload: &StationsPayload) -> Result<Uuid, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let current: Option<(Option<Uuid>,)> =
        sqlx::query_as("SELECT current_payload_id FROM station_state WHERE singleton = true FOR UPDATE")
            .fetch_optional(&mut *tx)
            .await?;
    let current_payload_id = current.and_then(|row| row.0);

    let current_fingerprint: Option<String> = match current_payload_id {
        Some(id) => sqlx::query_scalar("SELECT fingerprint FROM station_payloads WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?,
        None => None,
    };

    // Same fingerprint as what's already current: touch the state row's
    // `updated_at` only, insert nothing, swap nothing (§3/§8 invariant: an
    // unchanged catalog produces no new payload or station rows).
    if current_fingerprint.as_deref() == Some(payload.fingerprint.as_str()) {
        let payload_id = current_payload_id.expect("fingerprint matched an existing payload");
        sqlx::query("UPDATE station_state SET updated_at = now() WHERE singleton = true")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        return Ok(payload_id);
    }

    let payload_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO station_payloads (schema_version, source, requests, total, fingerprint)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(payload.schema_version as i32)
    .bind(&payload.source)
    .bind(&payload.requests)
    .bind(payload.total as i32)
    .bind(&payload.fingerprint)
    .fetch_one(&mut *tx)
    .await?;

    for chunk in payload.stations.chunks(INSERT_BATCH_SIZE) {
        insert_station_batch(&mut tx, payload_id, chunk).await?;
    }

    sqlx::query("UPDATE station_state SET current_payload_id = $1, updated_at = now() WHERE singleton = true")
        .bind(payload_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    if let Some(prev_id) = current_payload_id {
        if prev_id != payload_id {
            if let Err(err) = sqlx::query("DELETE FROM station_payloads WHERE id = $1").bind(prev_id).execute(pool).await
            {
                tracing::warn!(error = %err, payload_id = %prev_id, "failed to clean up superseded payload");
            }
        }
    }

    Ok(payload_id)
}

async fn insert_station_batch(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    payload_id: Uuid,
    stations: &[Station],
) -> Result<(), sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO stations (payload_id, station_id, name, stream_url, homepage, favicon, country, \
         country_code, state, languages, tags, geo_lat, geo_lon, bitrate, codec, hls, is_online, \
         last_checked_at, last_changed_at, click_count, click_trend, votes) ",
    );

    builder.push_values(stations, |mut b, station| {
        let row = NewStationRow::from(station);
        b.push_bind(payload_id)
            .push_bind(row.station_id)
            .push_bind(row.name)
            .push_bind(row.stream_url)
            .push_bind(row.homepage)
            .push_bind(row.favicon)
            .push_bind(row.country)
            .push_bind(row.country_code)
            .push_bind(row.state)
            .push_bind(row.languages)
            .push_bind(row.tags)
            .push_bind(row.geo_lat)
            .push_bind(row.geo_lon)
            .push_bind(row.bitrate)
            .push_bind(row.codec)
            .push_bind(row.hls)
            .push_bind(row.is_online)
            .push_bind(row.last_checked_at)
            .push_bind(row.last_changed_at)
            .push_bind(row.click_count)
            .push_bind(row.click_trend)
            .push_bind(row.votes);
    });

    builder.build().execute(&mut **tx).await?;
    Ok(())
}

/// Loads the currently-published payload, or `None` if the service has
/// never completed a refresh.
pub async fn load_current(pool: &PgPool) -> Result<Option<StationsPayload>, sqlx::Error> {
    let pointer: Option<(Option<Uuid>, chrono::DateTime<chrono::Utc>)> =
        sqlx::query_as("SELECT current_payload_id, updated_at FROM station_state WHERE singleton = true")
            .fetch_optional(pool)
            .await?;
    let (payload_id, state_updated_at) = match pointer {
        Some((Some(id), updated_at)) => (id, updated_at),
        _ => return Ok(None),
    };

    let payload_row: Option<PayloadRow> = sqlx::query_as(
        "SELECT id, schema_version, source, requests, total, fingerprint, created_at FROM station_payloads WHERE id = $1",
    )
    .bind(payload_id)
    .fetch_optional(pool)
    .await?;
    let payload_row = match payload_row {
        Some(row) => row,
        None => return Ok(None),
    };

    let station_rows: Vec<StationRow> = sqlx::query_as(
        r#"
        SELECT id, payload_id, station_id, name, stream_url, homepage, favicon, country, country_code,
               state, languages, tags, geo_lat, geo_lon, bitrate, codec, hls, is_online,
               last_checked_at, last_changed_at, click_count, click_trend, votes
        FROM stations
        WHERE payload_id = $1
        ORDER BY click_count DESC
        "#,
    )
    .bind(payload_id)
    .fetch_all(pool)
    .await?;

    let stations: Vec<Station> = station_rows.into_iter().map(Station::from).collect();

    Ok(Some(StationsPayload {
        schema_version: payload_row.schema_version as u32,
        updated_at: state_updated_at.timestamp_millis(),
        source: payload_row.source,
        requests: payload_row.requests,
        total: payload_row.total as usize,
        fingerprint: payload_row.fingerprint,
        stations,
    }))
}
