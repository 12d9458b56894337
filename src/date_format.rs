use chrono::{DateTime, NaiveDateTime};
use serde::de::Error;
use serde::{self, Deserialize, Deserializer, Serializer};

pub fn serialize<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_i64(date.and_utc().timestamp_millis())
}

pub fn timestamp_to_date_time(timestamp: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(timestamp).map(|date| date.naive_utc())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let timestamp = i64::deserialize(deserializer)?;
    timestamp_to_date_time(timestamp).ok_or_else(|| D::Error::custom("timestamp out of range"))
}

pub mod option {
    use chrono::NaiveDateTime;
    use serde::de::Error;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if let Some(date) = date {
            super::serialize(date, serializer)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<i64>::deserialize(deserializer)? {
            Some(timestamp) => super::timestamp_to_date_time(timestamp)
                .map(Some)
                .ok_or_else(|| D::Error::custom("timestamp out of range")),
            None => Ok(None),
        }
    }
}

#[test]
fn date_format_test() {
    #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Stamp {
        #[serde(with = "crate::date_format")]
        at: NaiveDateTime,
        #[serde(with = "crate::date_format::option")]
        until: Option<NaiveDateTime>,
    }

    let at = timestamp_to_date_time(1_700_000_000_123).unwrap();
    let stamp = Stamp { at, until: None };
    let json = serde_json::to_string(&stamp).unwrap();
    assert_eq!(json, r#"{"at":1700000000123,"until":null}"#);
    let parsed: Stamp = serde_json::from_str(r#"{"at":1700000000123,"until":1700000000000}"#).unwrap();
    assert_eq!(parsed.at, at);
    assert_eq!(parsed.until, timestamp_to_date_time(1_700_000_000_000));
}
