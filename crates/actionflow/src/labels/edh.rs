//! EDH label vocabularies and the EDH policy model.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize, Serializer};

use super::{
    Label, LabelKind, SecurityLabelBuilder, POLICY_INFORMATION_HEADER, SECURITY_LABEL_HEADER,
};
use crate::error::LabelError;
use crate::record::Header;

/// Simplified EDH vocabulary.
pub struct EdhV1;

impl EdhV1 {
    /// Organisations permitted to see the data.
    pub const PERMITTED_ORGANISATIONS: Label = Label::multi("deployed_organisation");
    /// Nationalities permitted to see the data.
    pub const PERMITTED_NATIONALITIES: Label = Label::multi("nationality");
    /// Required clearance.
    pub const CLASSIFICATION: Label = Label::single("clearance");
}

/// EDH vocabulary with group support.
pub struct EdhV2;

impl EdhV2 {
    /// Organisations permitted to see the data.
    pub const PERMITTED_ORGANISATIONS: Label = Label::multi("permitted_organisations");
    /// Nationalities permitted to see the data.
    pub const PERMITTED_NATIONALITIES: Label = Label::multi("permitted_nationalities");
    /// Classification of the data.
    pub const CLASSIFICATION: Label = Label::single("classification");
    /// Groups a user must belong to, all of them.
    pub const AND_GROUPS: Label = Label::new("and_groups", "groups", LabelKind::AndGroup);
    /// Groups a user must belong to, any of them.
    pub const OR_GROUPS: Label = Label::new("or_groups", "groups", LabelKind::OrGroup);
}

fn default_api_version() -> Option<String> {
    Some("v1alpha".to_string())
}

fn default_specification() -> Option<String> {
    Some("UKIC v3.0".to_string())
}

/// Default for the optional date fields: 2023-12-14T00:00:00+00:00.
fn default_date() -> Option<DateTime<FixedOffset>> {
    Utc.with_ymd_and_hms(2023, 12, 14, 0, 0, 0)
        .single()
        .map(|dt| dt.fixed_offset())
}

#[allow(clippy::ref_option)]
fn serialize_date<S: Serializer>(
    value: &Option<DateTime<FixedOffset>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
        None => serializer.serialize_none(),
    }
}

/// Data header describing handling policy for a piece of data.
///
/// Field names follow the wire model's camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdhModel {
    /// Model API version.
    #[serde(default = "default_api_version")]
    pub api_version: Option<String>,
    /// Policy specification the model follows.
    #[serde(default = "default_specification")]
    pub specification: Option<String>,
    /// Identifier of the data item.
    pub identifier: String,
    /// Classification, e.g. `S`.
    pub classification: String,
    /// Permitted organisations.
    pub permitted_orgs: Vec<String>,
    /// Permitted nationalities.
    pub permitted_nats: Vec<String>,
    /// Groups of which any grants access.
    pub or_groups: Vec<String>,
    /// Groups all of which are required.
    pub and_groups: Vec<String>,
    /// When the data was created.
    #[serde(default = "default_date", serialize_with = "serialize_date")]
    pub created_date_time: Option<DateTime<FixedOffset>>,
    /// Originator of the data.
    #[serde(default)]
    pub originator: Option<String>,
    /// Custodian of the data.
    #[serde(default)]
    pub custodian: Option<String>,
    /// Policy reference.
    #[serde(default)]
    pub policy_ref: Option<String>,
    /// Data sets the item belongs to.
    pub data_set: Vec<String>,
    /// Authority references.
    pub auth_ref: Vec<String>,
    /// Date after which the data should be disposed of.
    #[serde(default = "default_date", serialize_with = "serialize_date")]
    pub disposition_date: Option<DateTime<FixedOffset>>,
    /// How the data should be disposed of.
    #[serde(default)]
    pub disposition_process: Option<String>,
    /// Dissemination controls.
    pub dissemination: Vec<String>,
}

impl EdhModel {
    /// Creates a model with the required identity and access fields.
    ///
    /// List fields not given here start empty; optional fields take their
    /// defaults.
    #[must_use]
    pub fn new(identifier: impl Into<String>, classification: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            specification: default_specification(),
            identifier: identifier.into(),
            classification: classification.into(),
            permitted_orgs: Vec::new(),
            permitted_nats: Vec::new(),
            or_groups: Vec::new(),
            and_groups: Vec::new(),
            created_date_time: default_date(),
            originator: None,
            custodian: None,
            policy_ref: None,
            data_set: Vec::new(),
            auth_ref: Vec::new(),
            disposition_date: default_date(),
            disposition_process: None,
            dissemination: Vec::new(),
        }
    }

    /// Builds the security label expression for this model.
    ///
    /// Clauses are added in order: classification, organisations,
    /// nationalities, AND groups, OR groups. Empty group lists add no clause.
    ///
    /// # Errors
    ///
    /// Returns `LabelError` if a label rejects its values.
    pub fn build_security_labels(&self) -> Result<String, LabelError> {
        let mut builder = SecurityLabelBuilder::new();
        builder
            .add(&EdhV2::CLASSIFICATION, &self.classification)?
            .add_multiple(&EdhV2::PERMITTED_ORGANISATIONS, self.permitted_orgs.as_slice())?
            .add_multiple(&EdhV2::PERMITTED_NATIONALITIES, self.permitted_nats.as_slice())?;
        if !self.and_groups.is_empty() {
            builder.add_multiple(&EdhV2::AND_GROUPS, self.and_groups.as_slice())?;
        }
        if !self.or_groups.is_empty() {
            builder.add_multiple(&EdhV2::OR_GROUPS, self.or_groups.as_slice())?;
        }
        Ok(builder.build())
    }

    /// Returns the `policyInformation` and `Security-Label` headers for this model.
    ///
    /// # Errors
    ///
    /// Returns `LabelError` if the security label cannot be built.
    pub fn policy_headers(&self) -> Result<Vec<Header>, LabelError> {
        let label = self.build_security_labels()?;
        let policy = serde_json::json!({ "DH": self });
        Ok(vec![
            Header::encoded(POLICY_INFORMATION_HEADER, policy),
            Header::encoded(SECURITY_LABEL_HEADER, label),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;

    fn model() -> EdhModel {
        let mut m = EdhModel::new("ItemA", "S");
        m.permitted_orgs = vec!["ABC".into(), "DEF".into(), "HIJ".into()];
        m.permitted_nats = vec!["GBR".into(), "FRA".into(), "IRL".into()];
        m.or_groups = vec!["Apple".into(), "SOMETHING".into()];
        m.and_groups = vec!["doctor".into(), "admin".into()];
        m
    }

    #[test]
    fn test_build_security_labels() {
        let expected = "(classification=S&\
            (permitted_organisations=ABC|permitted_organisations=DEF|permitted_organisations=HIJ)&\
            (permitted_nationalities=GBR|permitted_nationalities=FRA|permitted_nationalities=IRL)&\
            doctor:and&admin:and&(Apple:or|SOMETHING:or))";
        assert_eq!(model().build_security_labels().unwrap(), expected);
    }

    #[test]
    fn test_empty_groups_add_no_clause() {
        let mut m = model();
        m.and_groups.clear();
        m.or_groups.clear();
        let label = m.build_security_labels().unwrap();
        assert!(!label.contains("&&"));
        assert!(label.ends_with("permitted_nationalities=IRL))"));
    }

    #[test]
    fn test_defaults_and_serialization() {
        let m = model();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["apiVersion"], "v1alpha");
        assert_eq!(json["specification"], "UKIC v3.0");
        assert_eq!(json["createdDateTime"], "2023-12-14T00:00:00+00:00");
        assert_eq!(json["permittedOrgs"][0], "ABC");
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let json = r#"{
            "identifier": "ItemA", "classification": "S",
            "permittedOrgs": [], "permittedNats": [], "orGroups": [], "andGroups": [],
            "dataSet": ["ds1"], "authRef": [], "dissemination": []
        }"#;
        let m: EdhModel = serde_json::from_str(json).unwrap();
        assert_eq!(m.api_version.as_deref(), Some("v1alpha"));
        assert_eq!(m.disposition_date, default_date());
        assert_eq!(m.data_set, vec!["ds1".to_string()]);
    }

    #[test]
    fn test_policy_headers() {
        let headers = model().policy_headers().unwrap();
        assert_eq!(headers[0].key, "policyInformation");
        assert_eq!(headers[1].key, "Security-Label");
        let Some(Payload::Bytes(policy)) = &headers[0].value else {
            panic!("policy header should be encoded bytes");
        };
        let value: serde_json::Value = serde_json::from_slice(policy).unwrap();
        assert_eq!(value["DH"]["identifier"], "ItemA");
    }

    #[test]
    fn test_v1_vocabulary() {
        assert_eq!(EdhV1::CLASSIFICATION.render(&["O"]).unwrap(), "clearance=O");
        assert_eq!(
            EdhV1::PERMITTED_NATIONALITIES.render(&["GBR"]).unwrap(),
            "(nationality=GBR)"
        );
    }
}
