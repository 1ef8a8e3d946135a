use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smart_scraper::cli::config::{JobConfig, OutputFormat};
use smart_scraper::storage::sink_for;
use smart_scraper::JobRunner;

const QUOTES: &str = r#"
<html><body>
  <div class="quote"><span class="text">“First”</span><small class="author">Ada</small>
    <a class="tag" href="/tag/one">one</a><a class="tag" href="/tag/two">two</a></div>
  <div class="quote"><span class="text">“Second”</span><small class="author"> Grace </small></div>
  <div class="quote"><span class="text">“Third”</span></div>
  <div class="quote"><span class="other">nothing we look for</span></div>
</body></html>
"#;

fn web_job(server: &MockServer, start: &str, extra: &str) -> JobConfig {
    let yaml = format!(
        r#"
name: Quotes Test
urls: ["{uri}{start}"]
selectors:
  item: div.quote
  fields:
    text: span.text
    author: small.author
    tag_links:
      selector: a.tag
      attr: href
request_delay: 0
max_retries: 2
request_timeout: 5
{extra}
"#,
        uri = server.uri(),
        start = start,
        extra = extra,
    );
    JobConfig::from_yaml(&yaml).unwrap()
}

#[tokio::test]
async fn test_static_job_extracts_and_processes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quotes"))
        .respond_with(ResponseTemplate::new(200).set_body_string(QUOTES))
        .expect(1)
        .mount(&server)
        .await;

    // No robots.txt mock: the 404 means everything is allowed
    let job = web_job(
        &server,
        "/quotes",
        r#"
respect_robots: true
processing_rules:
  text_cleaning:
    text:
      regex_replace:
        "^“": ""
        "”$": ""
  validations:
    author:
      required: true
"#,
    );

    let output = JobRunner::new(job).run().await.unwrap();

    assert_eq!(output.records.len(), 3);
    assert_eq!(output.records[0]["text"], "First");
    assert_eq!(
        output.records[0]["tag_links"],
        json!(format!("{0}/tag/one, {0}/tag/two", server.uri()))
    );
    assert_eq!(output.records[1]["author"], "Grace");
    assert_eq!(output.records[2]["author"], Value::Null);

    assert_eq!(output.stats.pages_scraped, 1);
    assert_eq!(output.stats.pages_failed, 0);
    assert_eq!(output.stats.items_extracted, 3);
    assert_eq!(output.stats.items_processed, 3);
}

#[tokio::test]
async fn test_static_pagination_stops_on_revisit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<div class="quote"><span class="text">a</span></div><a class="next" href="/page/2">next</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<div class="quote"><span class="text">b</span></div><a class="next" href="/page/1#top">again</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let job = web_job(
        &server,
        "/page/1",
        "respect_robots: false\npagination:\n  next_page_selector: a.next\n",
    );
    let output = JobRunner::new(job).run().await.unwrap();

    let texts: Vec<&Value> = output.records.iter().map(|r| &r["text"]).collect();
    assert_eq!(texts, vec![&json!("a"), &json!("b")]);
    assert_eq!(output.stats.pages_scraped, 2);
}

#[tokio::test]
async fn test_robots_disallow_skips_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/quotes"))
        .respond_with(ResponseTemplate::new(200).set_body_string(QUOTES))
        .expect(0)
        .mount(&server)
        .await;

    let job = web_job(&server, "/private/quotes", "respect_robots: true");
    let output = JobRunner::new(job).run().await.unwrap();

    assert!(output.records.is_empty());
    assert_eq!(output.stats.robots_skipped, 1);
    assert_eq!(output.stats.pages_scraped, 0);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let job = web_job(&server, "/missing", "respect_robots: false");
    let output = JobRunner::new(job).run().await.unwrap();

    assert!(output.records.is_empty());
    assert_eq!(output.stats.pages_failed, 1);
    assert_eq!(output.stats.pages_scraped, 0);
}

#[tokio::test]
async fn test_api_job_maps_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/items"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "items": [
                    {"id": 1, "attributes": {"title": "Lamp", "price": "10.50"}},
                    {"id": 2, "attributes": {"title": "Desk"}},
                    "not an object"
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
name: Items
api_config:
  base_url: "{}/v1"
  endpoints: ["/items"]
  data_path: data.items
  params:
    limit: "2"
  field_mappings:
    item_id: id
    title: attributes.title
    price: attributes.price
processing_rules:
  field_types:
    price:
      type: float
request_delay: 0
max_retries: 0
respect_robots: false
"#,
        server.uri()
    );
    let job = JobConfig::from_yaml(&yaml).unwrap();

    let output = JobRunner::new(job).run().await.unwrap();

    assert_eq!(
        output.records,
        vec![
            json!({"item_id": 1, "title": "Lamp", "price": 10.5}).as_object().cloned().unwrap(),
            json!({"item_id": 2, "title": "Desk", "price": null}).as_object().cloned().unwrap(),
        ]
    );
    assert_eq!(output.stats.pages_scraped, 1);
}

#[tokio::test]
async fn test_records_saved_as_json_and_csv() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quotes"))
        .respond_with(ResponseTemplate::new(200).set_body_string(QUOTES))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let job = web_job(&server, "/quotes", "respect_robots: false");
    let output = JobRunner::new(job.clone()).run().await.unwrap();

    let json_path = sink_for(OutputFormat::Json, tmp.path(), &job.name)
        .save(&output.records, &output.stats)
        .await
        .unwrap();
    assert!(json_path.file_name().unwrap().to_string_lossy().starts_with("quotes_test_"));
    let saved: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(saved.len(), 3);

    let csv_path = sink_for(OutputFormat::Csv, tmp.path().join("csv"), &job.name)
        .save(&output.records, &output.stats)
        .await
        .unwrap();
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert!(csv.starts_with("text,author,tag_links\r\n"));
    assert_eq!(csv.lines().count(), 4);
}
