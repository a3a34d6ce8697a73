//! Request construction for the ECHO REST endpoints.

use std::fmt::Write as _;

use chrono::NaiveDate;
use chrono::format::{Item, StrftimeItems};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::constants::FACILITY_QUERY_COLUMNS;
use crate::harvest::key::{EntityId, RegionCode, WorkKey};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid service base URL `{url}`: {message}")]
    InvalidBaseUrl { url: String, message: String },
    #[error("failed to join endpoint `{endpoint}` onto the service base URL: {message}")]
    Join { endpoint: String, message: String },
    #[error("unsupported date format `{0}`")]
    InvalidDateFormat(String),
    #[error("year {0} is outside the supported calendar")]
    InvalidYear(i32),
}

/// Fully specified GET request for one work key.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

/// Pure, stable mapping from work keys to request URLs.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    facility_url: Url,
    dmr_url: Url,
    client_ip: Option<String>,
    date_format: String,
}

#[bon::bon]
impl QueryBuilder {
    #[builder]
    pub fn new(
        #[builder(into)] base_url: String,
        #[builder(into)] facility_endpoint: String,
        #[builder(into)] dmr_endpoint: String,
        #[builder(into)] date_format: String,
        client_ip: Option<String>,
    ) -> Result<Self, QueryError> {
        validate_date_format(&date_format)?;

        let mut base = Url::parse(&base_url).map_err(|err| QueryError::InvalidBaseUrl {
            url: base_url.clone(),
            message: err.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(QueryError::InvalidBaseUrl {
                url: base_url,
                message: "URL cannot carry a path".to_string(),
            });
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let join = |endpoint: &str| {
            base.join(endpoint).map_err(|err| QueryError::Join {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            })
        };

        Ok(Self {
            facility_url: join(&facility_endpoint)?,
            dmr_url: join(&dmr_endpoint)?,
            client_ip: client_ip.filter(|ip| !ip.trim().is_empty()),
            date_format,
        })
    }

    pub fn build(&self, key: &WorkKey) -> Result<FetchRequest, QueryError> {
        let url = match key.entity_id() {
            None => self.facility_query(key.year(), key.region()),
            Some(id) => self.dmr_query(key.year(), id)?,
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/csv, text/plain, */*"));
        Ok(FetchRequest { url, headers })
    }

    fn facility_query(&self, year: i32, region: &RegionCode) -> Url {
        let columns = (1..=FACILITY_QUERY_COLUMNS)
            .map(|column| column.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut url = self.facility_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("p_lod", "ann")
                .append_pair("p_year", &year.to_string())
                .append_pair("p_st", region.as_str())
                .append_pair("p_loads_data", "dmr")
                .append_pair("p_nd", "zero")
                .append_pair("p_est", "Y")
                .append_pair("p_param_group", "N")
                .append_pair("p_nutrient_agg", "N");
            if let Some(ip) = &self.client_ip {
                pairs.append_pair("p_ipaddr", ip);
            }
            pairs
                .append_pair("output", "CSV")
                .append_pair("qcolumns", &columns);
        }
        url
    }

    fn dmr_query(&self, year: i32, id: &EntityId) -> Result<Url, QueryError> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or(QueryError::InvalidYear(year))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31).ok_or(QueryError::InvalidYear(year))?;
        let start = self.format_date(start)?;
        let end = self.format_date(end)?;

        let mut url = self.dmr_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("p_start_date", &start)
                .append_pair("p_end_date", &end)
                .append_pair("p_npdes_id", id.as_str());
            if let Some(ip) = &self.client_ip {
                pairs.append_pair("p_ipaddr", ip);
            }
            pairs.append_pair("output", "CSV");
        }
        Ok(url)
    }

    fn format_date(&self, date: NaiveDate) -> Result<String, QueryError> {
        let mut out = String::new();
        write!(out, "{}", date.format(&self.date_format))
            .map_err(|_| QueryError::InvalidDateFormat(self.date_format.clone()))?;
        Ok(out)
    }
}

/// Reject strftime patterns chrono cannot render for a plain date.
pub fn validate_date_format(format: &str) -> Result<(), QueryError> {
    if format.trim().is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(QueryError::InvalidDateFormat(format.to_string()));
    }
    let sample = NaiveDate::from_ymd_opt(2000, 1, 1).ok_or(QueryError::InvalidYear(2000))?;
    let mut out = String::new();
    write!(out, "{}", sample.format(format))
        .map_err(|_| QueryError::InvalidDateFormat(format.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DEFAULT_SERVICE_BASE_URL, DMR_ENDPOINT, FACILITY_ENDPOINT};

    fn builder(date_format: &str, ip: Option<&str>) -> QueryBuilder {
        QueryBuilder::builder()
            .base_url(DEFAULT_SERVICE_BASE_URL)
            .facility_endpoint(FACILITY_ENDPOINT)
            .dmr_endpoint(DMR_ENDPOINT)
            .date_format(date_format)
            .maybe_client_ip(ip.map(str::to_string))
            .build()
            .expect("valid query builder")
    }

    fn oh() -> RegionCode {
        "OH".parse().expect("valid region")
    }

    fn param(url: &Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    #[test]
    fn facility_query_carries_fixed_parameters_in_order() {
        let request = builder("%m/%d/%Y", Some("10.0.0.1"))
            .build(&WorkKey::facility(2000, oh()))
            .expect("build request");
        let url = request.url;

        assert_eq!(
            url.as_str().split('?').next(),
            Some("https://echodata.epa.gov/echo/dmr_rest_services.get_custom_data_annual")
        );
        let names: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(
            names,
            vec![
                "p_lod",
                "p_year",
                "p_st",
                "p_loads_data",
                "p_nd",
                "p_est",
                "p_param_group",
                "p_nutrient_agg",
                "p_ipaddr",
                "output",
                "qcolumns"
            ]
        );
        assert_eq!(param(&url, "p_year").as_deref(), Some("2000"));
        assert_eq!(param(&url, "p_st").as_deref(), Some("OH"));
        let columns = param(&url, "qcolumns").expect("qcolumns present");
        assert!(columns.starts_with("1,2,3,"));
        assert!(columns.ends_with(",80"));
    }

    #[test]
    fn dmr_query_uses_configured_date_format() {
        let id: EntityId = "OH0000001".parse().expect("valid id");
        let key = WorkKey::permit(2004, oh(), id);

        let url = builder("%m/%d/%Y", None).build(&key).expect("request").url;
        assert_eq!(param(&url, "p_start_date").as_deref(), Some("01/01/2004"));
        assert_eq!(param(&url, "p_end_date").as_deref(), Some("12/31/2004"));
        assert_eq!(param(&url, "p_npdes_id").as_deref(), Some("OH0000001"));
        assert_eq!(param(&url, "p_ipaddr"), None);

        let url = builder("%m/%Y", None).build(&key).expect("request").url;
        assert_eq!(param(&url, "p_start_date").as_deref(), Some("01/2004"));
        assert_eq!(param(&url, "p_end_date").as_deref(), Some("12/2004"));
    }

    #[test]
    fn same_key_always_builds_the_same_url() {
        let qb = builder("%m/%d/%Y", Some("1.2.3.4"));
        let key = WorkKey::facility(2010, oh());
        let a = qb.build(&key).expect("request").url;
        let b = qb.build(&key).expect("request").url;
        assert_eq!(a, b);
    }

    #[test]
    fn base_url_without_trailing_slash_keeps_its_path() {
        let qb = QueryBuilder::builder()
            .base_url("http://127.0.0.1:9000/echo")
            .facility_endpoint("annual")
            .dmr_endpoint("monthly")
            .date_format("%Y")
            .build()
            .expect("valid builder");
        let url = qb.build(&WorkKey::facility(2000, oh())).expect("request").url;
        assert_eq!(url.path(), "/echo/annual");
    }

    #[test]
    fn invalid_date_formats_are_rejected() {
        assert!(validate_date_format("%m/%d/%Y").is_ok());
        assert!(validate_date_format("%Q").is_err());
        assert!(validate_date_format("%H:%M %z").is_err());
        assert!(validate_date_format("").is_err());
    }
}
