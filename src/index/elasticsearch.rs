//! Elasticsearch index sink over the REST API

use super::{IndexError, IndexSink};
use crate::models::EventRecord;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;

/// Writes each record as a document in one Elasticsearch index.
///
/// Documents are keyed by the record id, so a redelivered record replaces
/// its earlier copy instead of appearing twice in search results.
pub struct ElasticsearchSink {
    client: Client,
    base_url: Url,
    index_name: String,
}

impl ElasticsearchSink {
    /// Create a sink for `index_name` on the cluster at `base_url`
    pub fn new(base_url: &str, index_name: &str, timeout: Duration) -> Result<Self, IndexError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| IndexError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(IndexError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(ElasticsearchSink {
            client,
            base_url,
            index_name: index_name.to_string(),
        })
    }

    fn document_url(&self, id: &str) -> Result<Url, IndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend([self.index_name.as_str(), "_doc", id]);
        Ok(url)
    }
}

#[async_trait]
impl IndexSink for ElasticsearchSink {
    async fn write(&self, record: &EventRecord) -> Result<(), IndexError> {
        let url = self.document_url(&record.id)?;
        let response = self.client.put(url).json(record).send().await?;

        let status = response.status();
        if status.is_success() {
            log::debug!("[indexed] {} -> {}", record.id, self.index_name);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(IndexError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn health_check(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.base_url.clone()).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(IndexError::Unavailable(format!(
                "{} answered {}",
                self.base_url, status
            )))
        }
    }

    fn name(&self) -> &'static str {
        "elasticsearch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogLevel;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_record(id: &str) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            timestamp: "2024-05-01T10:00:00Z".parse().unwrap(),
            service_name: "payment-service".to_string(),
            log_level: LogLevel::Info,
            event_type: "action_success".to_string(),
            source_ip: "192.168.1.10".to_string(),
            user_id: Some("jan_novak".to_string()),
            http_method: Some("GET".to_string()),
            endpoint: Some("/api/v1/process-payment".to_string()),
            response_time_ms: 120,
            message: Some("Action processed successfully".to_string()),
        }
    }

    fn create_sink(server: &MockServer) -> ElasticsearchSink {
        ElasticsearchSink::new(&server.uri(), "siem-logs", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_write_puts_document_by_id() {
        let server = MockServer::start().await;
        let record = create_record("evt-42");

        Mock::given(method("PUT"))
            .and(path("/siem-logs/_doc/evt-42"))
            .and(body_json(serde_json::to_value(&record).unwrap()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let sink = create_sink(&server);
        tokio_test::assert_ok!(sink.write(&record).await);
    }

    #[tokio::test]
    async fn test_write_reports_rejection() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("cluster red"))
            .mount(&server)
            .await;

        let sink = create_sink(&server);
        match sink.write(&create_record("evt-1")).await {
            Err(IndexError::Rejected { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "cluster red");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        tokio_test::assert_ok!(create_sink(&server).health_check().await);
    }

    #[tokio::test]
    async fn test_health_check_fails_when_unreachable() {
        let sink =
            ElasticsearchSink::new("http://127.0.0.1:9", "siem-logs", Duration::from_millis(500))
                .unwrap();
        assert!(sink.health_check().await.is_err());
    }

    #[test]
    fn test_document_url_escapes_id() {
        let sink =
            ElasticsearchSink::new("http://es:9200/", "siem-logs", Duration::from_secs(1)).unwrap();
        let url = sink.document_url("a/b c").unwrap();
        assert_eq!(url.as_str(), "http://es:9200/siem-logs/_doc/a%2Fb%20c");
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(
            ElasticsearchSink::new("not a url", "siem-logs", Duration::from_secs(1)),
            Err(IndexError::InvalidUrl(_))
        ));
    }
}
