use serde::Deserialize;

/// `issues` event payload, as delivered by GitHub.
#[derive(Debug, Deserialize)]
pub struct IssuesEvent {
    pub action: String,
    pub issue: IssuePayload,
    pub repository: RepositoryPayload,
    pub installation: Option<InstallationPayload>,
    pub label: Option<LabelPayload>,
}

#[derive(Debug, Deserialize)]
pub struct IssuePayload {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<LabelPayload>,
    /// Present when the "issue" is actually a pull request.
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct LabelPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPayload {
    pub full_name: String,
    pub default_branch: String,
}

#[derive(Debug, Deserialize)]
pub struct InstallationPayload {
    pub id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_labeled_issue_event() {
        let payload = serde_json::json!({
            "action": "labeled",
            "issue": {
                "number": 42,
                "title": "Flaky checkout test",
                "body": "The checkout suite fails intermittently.",
                "labels": [{"name": "trellis"}]
            },
            "repository": {
                "full_name": "acme/widgets",
                "default_branch": "main"
            },
            "installation": {"id": 123},
            "label": {"name": "trellis"}
        });

        let event: IssuesEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.action, "labeled");
        assert_eq!(event.issue.number, 42);
        assert_eq!(event.repository.full_name, "acme/widgets");
        assert_eq!(event.label.unwrap().name, "trellis");
        assert!(event.issue.pull_request.is_none());
    }
}
