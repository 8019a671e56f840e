use futures::{stream::BoxStream, StreamExt};
use sqlx::{
    query_builder::Separated,
    sqlite::{SqliteConnection, SqliteRow},
    FromRow, QueryBuilder, Sqlite,
};
use tokio_stream::wrappers::WatchStream;

use super::{LocalStore, StorageError};
use crate::domain::{EnergyType, Location, LocationKey, Meter};

/// Rows per INSERT statement, well under SQLite's bind parameter limit.
const INSERT_CHUNK: usize = 500;

const METER_COLUMNS: &[&str] = &[
    "id",
    "number",
    "energy_type",
    "street",
    "postal_code",
    "city",
    "house_number",
    "addition",
    "last_reading",
    "last_reading_date",
];

const LOCATION_COLUMNS: &[&str] = &["street", "postal_code", "city", "house_number", "addition", "meter_count"];

/// An entity cached as a wholesale-replaceable table.
pub trait CachedEntity: for<'r> FromRow<'r, SqliteRow> + Send + Sync + Unpin {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn bind_row<'qb, 'args>(&self, row: &mut Separated<'qb, 'args, Sqlite, &'static str>);
}

impl CachedEntity for Meter {
    const TABLE: &'static str = "meters";
    const COLUMNS: &'static [&'static str] = METER_COLUMNS;

    fn bind_row<'qb, 'args>(&self, row: &mut Separated<'qb, 'args, Sqlite, &'static str>) {
        row.push_bind(self.id.clone())
            .push_bind(self.number.clone())
            .push_bind(self.energy_type)
            .push_bind(self.street.clone())
            .push_bind(self.postal_code.clone())
            .push_bind(self.city.clone())
            .push_bind(self.house_number.clone())
            .push_bind(self.addition.clone())
            .push_bind(self.last_reading)
            .push_bind(self.last_reading_date);
    }
}

impl CachedEntity for Location {
    const TABLE: &'static str = "locations";
    const COLUMNS: &'static [&'static str] = LOCATION_COLUMNS;

    fn bind_row<'qb, 'args>(&self, row: &mut Separated<'qb, 'args, Sqlite, &'static str>) {
        row.push_bind(self.street.clone())
            .push_bind(self.postal_code.clone())
            .push_bind(self.city.clone())
            .push_bind(self.house_number.clone())
            .push_bind(self.addition.clone())
            .push_bind(self.meter_count);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeterFilter {
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub energy_type: Option<EnergyType>,
    /// Exact composite address match, NULL-safe on the addition.
    pub location: Option<LocationKey>,
}

impl MeterFilter {
    pub fn at(location: LocationKey) -> Self {
        Self {
            location: Some(location),
            ..Self::default()
        }
    }

    fn push_conditions(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(street) = &self.street {
            builder.push(" AND street = ").push_bind(street.clone());
        }
        if let Some(postal_code) = &self.postal_code {
            builder.push(" AND postal_code = ").push_bind(postal_code.clone());
        }
        if let Some(city) = &self.city {
            builder.push(" AND city = ").push_bind(city.clone());
        }
        if let Some(energy_type) = self.energy_type {
            builder.push(" AND energy_type = ").push_bind(energy_type);
        }
        if let Some(key) = &self.location {
            builder
                .push(" AND street = ")
                .push_bind(key.street.clone())
                .push(" AND postal_code = ")
                .push_bind(key.postal_code.clone())
                .push(" AND city = ")
                .push_bind(key.city.clone())
                .push(" AND house_number = ")
                .push_bind(key.house_number.clone())
                .push(" AND addition IS ")
                .push_bind(key.addition.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationFilter {
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

impl LocationFilter {
    fn push_conditions(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(street) = &self.street {
            builder.push(" AND street = ").push_bind(street.clone());
        }
        if let Some(postal_code) = &self.postal_code {
            builder.push(" AND postal_code = ").push_bind(postal_code.clone());
        }
        if let Some(city) = &self.city {
            builder.push(" AND city = ").push_bind(city.clone());
        }
    }
}

async fn replace_rows<E: CachedEntity>(conn: &mut SqliteConnection, records: &[E]) -> Result<(), StorageError> {
    let delete = format!("DELETE FROM {}", E::TABLE);
    sqlx::query(&delete).execute(&mut *conn).await?;

    for chunk in records.chunks(INSERT_CHUNK) {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("INSERT INTO {} ({}) ", E::TABLE, E::COLUMNS.join(", ")));
        builder.push_values(chunk, |mut row, record| record.bind_row(&mut row));
        builder.build().execute(&mut *conn).await?;
    }

    Ok(())
}

impl LocalStore {
    /// Atomically replace every row of `E`'s table with `records`.
    pub async fn replace_all<E: CachedEntity>(&self, records: &[E]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        replace_rows(&mut tx, records).await?;
        tx.commit().await?;

        tracing::debug!(table = E::TABLE, rows = records.len(), "cache table replaced");
        self.entities_changed();
        Ok(())
    }

    /// Replace meters and locations in one transaction, so no reader can see
    /// a meter set paired with a location set from another refresh.
    pub async fn replace_snapshot(&self, meters: &[Meter], locations: &[Location]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        replace_rows(&mut tx, meters).await?;
        replace_rows(&mut tx, locations).await?;
        tx.commit().await?;

        tracing::debug!(meters = meters.len(), locations = locations.len(), "cache snapshot replaced");
        self.entities_changed();
        Ok(())
    }

    pub async fn meters(&self, filter: &MeterFilter) -> Result<Vec<Meter>, StorageError> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM meters WHERE 1 = 1",
            METER_COLUMNS.join(", ")
        ));
        filter.push_conditions(&mut builder);
        builder.push(" ORDER BY street, house_number, addition, number");

        let rows = builder.build_query_as::<Meter>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn locations(&self, filter: &LocationFilter) -> Result<Vec<Location>, StorageError> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM locations WHERE 1 = 1",
            LOCATION_COLUMNS.join(", ")
        ));
        filter.push_conditions(&mut builder);
        builder.push(" ORDER BY city, street, house_number, addition");

        let rows = builder.build_query_as::<Location>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Live view: yields the current matching meters, then a fresh snapshot
    /// after every committed replacement.
    pub fn watch_meters(&self, filter: MeterFilter) -> BoxStream<'static, Result<Vec<Meter>, StorageError>> {
        let store = self.clone();
        WatchStream::new(self.entities.subscribe())
            .then(move |_| {
                let store = store.clone();
                let filter = filter.clone();
                async move { store.meters(&filter).await }
            })
            .boxed()
    }

    pub fn watch_locations(&self, filter: LocationFilter) -> BoxStream<'static, Result<Vec<Location>, StorageError>> {
        let store = self.clone();
        WatchStream::new(self.entities.subscribe())
            .then(move |_| {
                let store = store.clone();
                let filter = filter.clone();
                async move { store.locations(&filter).await }
            })
            .boxed()
    }
}
