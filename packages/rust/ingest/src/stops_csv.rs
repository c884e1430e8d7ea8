//! `stops_filtered.csv` (de)serialization.

use wasteroute_shared::{Result, RoutePlannerError, StopRow};

/// Serialize stops as CSV with a header row.
pub fn write_stops_csv(stops: &[StopRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for stop in stops {
        writer
            .serialize(stop)
            .map_err(|e| RoutePlannerError::parse(format!("failed to write stop {}: {e}", stop.id)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| RoutePlannerError::parse(format!("failed to flush stops CSV: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| RoutePlannerError::parse(format!("stops CSV is not UTF-8: {e}")))
}

/// Parse a stops CSV previously written by [`write_stops_csv`].
pub fn read_stops_csv(text: &str) -> Result<Vec<StopRow>> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let mut stops = Vec::new();
    for (i, record) in reader.deserialize::<StopRow>().enumerate() {
        let stop = record.map_err(|e| {
            RoutePlannerError::parse(format!("stops CSV row {}: {e}", i + 1))
        })?;
        stops.push(stop);
    }
    Ok(stops)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(id: &str, pueblo: Option<&str>) -> StopRow {
        StopRow {
            id: id.into(),
            lat: 40.416775,
            lng: -3.70379,
            service_s: 65,
            containers: 2,
            w_route: "Lunes,Martes".into(),
            w_wastes: "Papel".into(),
            pueblo: pueblo.map(String::from),
            municipio: None,
            fid: Some(id.into()),
        }
    }

    #[test]
    fn header_and_optional_fields() {
        let stops = vec![stop("7", Some("Villa")), stop("8", None)];
        let text = write_stops_csv(&stops).expect("write");
        let first_line = text.lines().next().expect("header");
        assert_eq!(
            first_line,
            "id,lat,lng,service_s,containers,w_route,w_wastes,pueblo,municipio,fid"
        );

        let back = read_stops_csv(&text).expect("read");
        assert_eq!(back, stops);
        assert_eq!(back[1].pueblo, None);
    }

    #[test]
    fn malformed_row_is_parse_error() {
        let text = "id,lat,lng,service_s,containers,w_route,w_wastes\n1,abc,2,45,1,R,W\n";
        let err = read_stops_csv(text).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn empty_table_reads_as_no_stops() {
        let text = write_stops_csv(&[]).expect("write");
        assert!(read_stops_csv(&text).expect("read").is_empty());
    }
}
