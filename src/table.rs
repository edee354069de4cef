//! CSV carrier for listing tables.
//!
//! Only the four location columns are interpreted; every other column is
//! passed through to the enriched output unchanged.

use crate::enrich::{EnrichedRow, ListingRow};
use crate::lookup::Coordinate;
use csv::{ReaderBuilder, StringRecord, Writer};
use std::path::Path;

pub const DERIVED_COLUMNS: [&str; 3] = [
    "nearest_city_center_miles",
    "nearest_landmark_miles",
    "nearest_landmark_name",
];

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("missing column '{0}'")]
    MissingColumn(String),
    #[error("output already has a '{0}' column")]
    ColumnClash(String),
}

/// Names of the columns enrichment reads.
#[derive(Debug, Clone)]
pub struct TableColumns {
    pub latitude: String,
    pub longitude: String,
    pub city: String,
    pub region: String,
}

/// One CSV row with its location fields pulled out.
#[derive(Debug, Clone)]
pub struct TableRow {
    pub record: StringRecord,
    coordinate: Option<Coordinate>,
    city: String,
    region: String,
}

impl ListingRow for TableRow {
    fn coordinate(&self) -> Option<Coordinate> {
        self.coordinate
    }

    fn city(&self) -> &str {
        &self.city
    }

    fn region(&self) -> &str {
        &self.region
    }
}

#[derive(Debug)]
pub struct Table {
    pub headers: StringRecord,
    pub rows: Vec<TableRow>,
}

impl Table {
    /// Distinct (city, region) pairs in first-seen order.
    pub fn unique_pairs(&self) -> Vec<(String, String)> {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .map(|r| (r.city.clone(), r.region.clone()))
            .filter(|pair| seen.insert(pair.clone()))
            .collect()
    }
}

fn column(headers: &StringRecord, name: &str) -> Result<usize, TableError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| TableError::MissingColumn(name.to_string()))
}

/// Blank or unparsable numbers are "no value", never zero.
fn parse_float(field: Option<&str>) -> Option<f64> {
    field.and_then(|f| f.trim().parse::<f64>().ok())
}

pub fn read_listings(path: &Path, columns: &TableColumns) -> Result<Table, TableError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let lat_idx = column(&headers, &columns.latitude)?;
    let lon_idx = column(&headers, &columns.longitude)?;
    let city_idx = column(&headers, &columns.city)?;
    let region_idx = column(&headers, &columns.region)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let coordinate = match (parse_float(record.get(lat_idx)), parse_float(record.get(lon_idx))) {
            (Some(lat), Some(lon)) => Coordinate::new(lat, lon),
            _ => None,
        };
        rows.push(TableRow {
            coordinate,
            city: record.get(city_idx).unwrap_or_default().to_string(),
            region: record.get(region_idx).unwrap_or_default().to_string(),
            record,
        });
    }
    log::info!("Read {} listings from {}", rows.len(), path.display());
    Ok(Table { headers, rows })
}

fn format_miles(miles: f64) -> String {
    if miles.is_nan() {
        String::new()
    } else {
        miles.to_string()
    }
}

pub fn write_enriched(path: &Path, headers: &StringRecord, rows: &[EnrichedRow<TableRow>]) -> Result<(), TableError> {
    if let Some(clash) = DERIVED_COLUMNS.into_iter().find(|c| headers.iter().any(|h| h == *c)) {
        return Err(TableError::ColumnClash(clash.to_string()));
    }
    let mut writer = Writer::from_path(path)?;

    let mut header = headers.clone();
    for name in DERIVED_COLUMNS {
        header.push_field(name);
    }
    writer.write_record(&header)?;

    for enriched in rows {
        let mut record = enriched.row.record.clone();
        record.push_field(&format_miles(enriched.nearest_city_center_miles));
        record.push_field(&format_miles(enriched.nearest_landmark_miles));
        record.push_field(enriched.nearest_landmark_name.as_deref().unwrap_or(""));
        writer.write_record(&record)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    log::info!("Wrote {} enriched rows to {}", rows.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn columns() -> TableColumns {
        TableColumns {
            latitude: "latitude".into(),
            longitude: "longitude".into(),
            city: "cityname".into(),
            region: "state".into(),
        }
    }

    const LISTINGS: &str = "\
id,price,cityname,state,latitude,longitude
1,1200,Baltimore,MD,39.29,-76.61
2,950,Denver,CO,,
3,1500,Baltimore,MD,39.30,-76.60
4,800,Reno,NV,abc,-119.8
";

    #[test]
    fn test_read_listings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("listings.csv");
        fs::write(&path, LISTINGS).unwrap();

        let table = read_listings(&path, &columns()).unwrap();
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.rows[0].coordinate(), Coordinate::new(39.29, -76.61));
        assert_eq!(table.rows[0].city(), "Baltimore");
        assert!(table.rows[1].coordinate().is_none());
        assert!(table.rows[3].coordinate().is_none());
        assert_eq!(
            table.unique_pairs(),
            vec![
                ("Baltimore".to_string(), "MD".to_string()),
                ("Denver".to_string(), "CO".to_string()),
                ("Reno".to_string(), "NV".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("listings.csv");
        fs::write(&path, "id,cityname,state,latitude\n1,A,B,1.0\n").unwrap();

        let err = read_listings(&path, &columns()).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn(c) if c == "longitude"));
    }

    #[test]
    fn test_write_enriched_appends_columns() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("listings.csv");
        let output = dir.path().join("enriched.csv");
        fs::write(&input, LISTINGS).unwrap();
        let table = read_listings(&input, &columns()).unwrap();

        let rows: Vec<EnrichedRow<TableRow>> = table
            .rows
            .into_iter()
            .take(2)
            .enumerate()
            .map(|(i, row)| EnrichedRow {
                row,
                nearest_city_center_miles: if i == 0 { 1.5 } else { f64::NAN },
                nearest_landmark_miles: if i == 0 { 0.25 } else { f64::NAN },
                nearest_landmark_name: (i == 0).then(|| "Inner Harbor".to_string()),
            })
            .collect();
        write_enriched(&output, &table.headers, &rows).unwrap();

        let text = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "id,price,cityname,state,latitude,longitude,nearest_city_center_miles,nearest_landmark_miles,nearest_landmark_name"
        );
        assert_eq!(lines[1], "1,1200,Baltimore,MD,39.29,-76.61,1.5,0.25,Inner Harbor");
        assert_eq!(lines[2], "2,950,Denver,CO,,,,,");
    }

    #[test]
    fn test_write_rejects_existing_derived_column() {
        let dir = TempDir::new().unwrap();
        let headers = StringRecord::from(vec!["id", "nearest_landmark_miles"]);
        let err = write_enriched(&dir.path().join("o.csv"), &headers, &[]).unwrap_err();
        assert!(matches!(err, TableError::ColumnClash(_)));
    }
}
