//! Hazard-zone persistence operations.
//!
//! Zones are loaded by the offline GIS pipeline; the service reads them via
//! the geohash4 bucket index. The upsert exists for that loader and for
//! seeding tests.

use sqlx::SqlitePool;

use lews_core::models::{BoundingBox, HazardLevel, HazardZone};

use crate::error::{classify_sqlx, LewsError};

/// Upsert a hazard zone.
pub async fn upsert_zone(pool: &SqlitePool, zone: &HazardZone) -> Result<(), LewsError> {
    sqlx::query(
        r#"
        INSERT INTO hazard_zones
            (zone_id, hazard_level, centroid_lat, centroid_lon, geohash4, geohash6,
             min_lat, max_lat, min_lon, max_lon,
             district, ds_division, gn_division, soil_type, land_use, landslide_type,
             area_sqm, version)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        ON CONFLICT(zone_id) DO UPDATE SET
            hazard_level = ?2, centroid_lat = ?3, centroid_lon = ?4,
            geohash4 = ?5, geohash6 = ?6,
            min_lat = ?7, max_lat = ?8, min_lon = ?9, max_lon = ?10,
            district = ?11, ds_division = ?12, gn_division = ?13,
            soil_type = ?14, land_use = ?15, landslide_type = ?16,
            area_sqm = ?17, version = ?18
        "#,
    )
    .bind(&zone.zone_id)
    .bind(zone.hazard_level.as_str())
    .bind(zone.centroid_lat)
    .bind(zone.centroid_lon)
    .bind(&zone.geohash4)
    .bind(&zone.geohash6)
    .bind(zone.bounding_box.min_lat)
    .bind(zone.bounding_box.max_lat)
    .bind(zone.bounding_box.min_lon)
    .bind(zone.bounding_box.max_lon)
    .bind(&zone.district)
    .bind(&zone.ds_division)
    .bind(&zone.gn_division)
    .bind(&zone.soil_type)
    .bind(&zone.land_use)
    .bind(&zone.landslide_type)
    .bind(zone.area_sqm)
    .bind(zone.version)
    .execute(pool)
    .await
    .map_err(classify_sqlx)?;

    Ok(())
}

/// All zones bucketed under a geohash4 cell.
pub async fn find_by_geohash4(pool: &SqlitePool, cell: &str) -> Result<Vec<HazardZone>, LewsError> {
    let rows = sqlx::query_as::<_, ZoneRow>(
        r#"
        SELECT zone_id, hazard_level, centroid_lat, centroid_lon, geohash4, geohash6,
               min_lat, max_lat, min_lon, max_lon,
               district, ds_division, gn_division, soil_type, land_use, landslide_type,
               area_sqm, version
        FROM hazard_zones
        WHERE geohash4 = ?1
        "#,
    )
    .bind(cell)
    .fetch_all(pool)
    .await
    .map_err(classify_sqlx)?;

    Ok(rows.into_iter().map(HazardZone::from).collect())
}

#[derive(sqlx::FromRow)]
struct ZoneRow {
    zone_id: String,
    hazard_level: String,
    centroid_lat: f64,
    centroid_lon: f64,
    geohash4: String,
    geohash6: String,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
    district: Option<String>,
    ds_division: Option<String>,
    gn_division: Option<String>,
    soil_type: Option<String>,
    land_use: Option<String>,
    landslide_type: Option<String>,
    area_sqm: f64,
    version: i64,
}

impl From<ZoneRow> for HazardZone {
    fn from(row: ZoneRow) -> Self {
        HazardZone {
            zone_id: row.zone_id,
            hazard_level: HazardLevel::parse(&row.hazard_level),
            centroid_lat: row.centroid_lat,
            centroid_lon: row.centroid_lon,
            geohash4: row.geohash4,
            geohash6: row.geohash6,
            bounding_box: BoundingBox {
                min_lat: row.min_lat,
                max_lat: row.max_lat,
                min_lon: row.min_lon,
                max_lon: row.max_lon,
            },
            district: row.district,
            ds_division: row.ds_division,
            gn_division: row.gn_division,
            soil_type: row.soil_type,
            land_use: row.land_use,
            landslide_type: row.landslide_type,
            area_sqm: row.area_sqm,
            version: row.version,
        }
    }
}
