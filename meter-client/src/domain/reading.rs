use time::Date;
use uuid::Uuid;

/// A reading as entered by the user, before it has an identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingDraft {
    pub meter_id: String,
    pub value: f64,
    pub date: Date,
    pub read_by: String,
}

impl ReadingDraft {
    /// Assign the client-generated identifier. Every delivery attempt of the
    /// resulting reading carries the same id, so the remote can deduplicate.
    pub fn into_reading(self) -> Reading {
        Reading {
            id: Uuid::new_v4(),
            meter_id: self.meter_id,
            value: self.value,
            date: self.date,
            read_by: self.read_by,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub id: Uuid,
    pub meter_id: String,
    pub value: f64,
    pub date: Date,
    pub read_by: String,
}

impl Reading {
    /// JSON body accepted by `POST readings`.
    pub fn to_body(&self) -> String {
        serde_json::json!({
            "id": self.id.to_string(),
            "meter_id": self.meter_id,
            "value": self.value,
            "date": self.date.to_string(),
            "read_by": self.read_by,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn drafts_get_distinct_identifiers() {
        let draft = ReadingDraft {
            meter_id: "m-1".to_string(),
            value: 1234.5,
            date: date!(2024 - 03 - 01),
            read_by: "jdoe".to_string(),
        };

        let a = draft.clone().into_reading();
        let b = draft.into_reading();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn body_carries_identifier_and_iso_date() {
        let reading = Reading {
            id: Uuid::nil(),
            meter_id: "m-1".to_string(),
            value: 17.25,
            date: date!(2024 - 03 - 01),
            read_by: "jdoe".to_string(),
        };

        let body: serde_json::Value = serde_json::from_str(&reading.to_body()).unwrap();
        assert_eq!(body["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(body["meter_id"], "m-1");
        assert_eq!(body["value"], 17.25);
        assert_eq!(body["date"], "2024-03-01");
        assert_eq!(body["read_by"], "jdoe");
    }
}
