//! Adapters against a local HTTP server serving canned provider responses.

use polychat_core_sdk::{
    error::ChatError,
    llm::{
        AzureOpenAiService, ChatService, ChunkSink, ClaudeService, GeminiService, GroqService,
        OpenAiService,
    },
    models::{AzureConfig, ClaudeConfig, GeminiConfig, GroqConfig, Message, OpenAiConfig},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};

/**
 * \brief Serves one connection with `status`/`content_type`/`body`, returning the raw request.
 */
async fn serve_once(
    status: &'static str,
    content_type: &'static str,
    body: String,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.expect("read");
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            if request_complete(&raw) {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            content_type,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.expect("write");
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&raw).into_owned()
    });
    (format!("http://{}", addr), handle)
}

fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(head_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..head_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    raw.len() >= head_end + 4 + content_length
}

fn history() -> Vec<Message> {
    vec![
        Message::system("You are a helpful assistant."),
        Message::user("Hello"),
    ]
}

async fn stream_collect(service: &dyn ChatService) -> (Result<String, ChatError>, Vec<String>) {
    let mut chunks = Vec::new();
    let mut sink = |c: &str| chunks.push(c.to_string());
    let cb: &mut ChunkSink<'_> = &mut sink;
    let result = service.send_message(&history(), Some(cb)).await;
    (result, chunks)
}

fn openai_config() -> OpenAiConfig {
    OpenAiConfig {
        api_key: "sk-test".into(),
        model: "gpt-4".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_openai_stream_concatenates_chunks() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
        "data: [DONE]\n\n",
    )
    .to_string();
    let (base, server) = serve_once("200 OK", "text/event-stream", body).await;
    let service = OpenAiService::new(openai_config()).with_base_url(base);

    let (result, chunks) = stream_collect(&service).await;
    assert_eq!(result.expect("stream"), "Hi there");
    assert_eq!(chunks, vec!["Hi", " there"]);

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /chat/completions"));
    assert!(request.to_lowercase().contains("authorization: bearer sk-test"));
    assert!(request.contains("\"stream\":true"));
}

#[tokio::test]
async fn test_openai_complete_returns_message_content() {
    let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hello back"}}]}"#;
    let (base, server) = serve_once("200 OK", "application/json", body.to_string()).await;
    let service = OpenAiService::new(openai_config()).with_base_url(base);

    let reply = service.send_message(&history(), None).await.expect("complete");
    assert_eq!(reply, "Hello back");
    assert!(server.await.unwrap().contains("\"stream\":false"));
}

#[tokio::test]
async fn test_http_error_becomes_upstream() {
    let (base, _server) = serve_once(
        "500 Internal Server Error",
        "application/json",
        r#"{"error":{"message":"overloaded"}}"#.to_string(),
    )
    .await;
    let service = OpenAiService::new(openai_config()).with_base_url(base);

    let (result, chunks) = stream_collect(&service).await;
    let err = result.unwrap_err();
    assert!(chunks.is_empty());
    match &err {
        ChatError::Upstream { provider, message } => {
            assert_eq!(provider, "OpenAI");
            assert!(message.contains("500"), "{}", message);
            assert!(message.contains("overloaded"), "{}", message);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().starts_with("Error calling OpenAI API:"));
}

#[tokio::test]
async fn test_groq_stream_uses_openai_wire_format() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"fast\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" reply\"}}]}\n\n",
        "data: [DONE]\n\n",
    )
    .to_string();
    let (base, server) = serve_once("200 OK", "text/event-stream", body).await;
    let service = GroqService::new(GroqConfig {
        api_key: "gsk".into(),
        model: "mixtral-8x7b-32768".into(),
        ..Default::default()
    })
    .with_base_url(base);

    let (result, chunks) = stream_collect(&service).await;
    assert_eq!(result.expect("stream"), chunks.concat());
    assert_eq!(chunks, vec!["fast", " reply"]);

    let request = server.await.unwrap();
    assert!(request.contains("\"model\":\"mixtral-8x7b-32768\""));
    assert!(!request.contains("frequency_penalty"));
}

#[tokio::test]
async fn test_claude_stream_reads_text_deltas() {
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"m1\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Bon\"}}\n\n",
        "event: ping\n",
        "data: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"jour\"}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    )
    .to_string();
    let (base, server) = serve_once("200 OK", "text/event-stream", body).await;
    let service = ClaudeService::new(ClaudeConfig {
        api_key: "ak".into(),
        model: "claude-3-haiku-20240307".into(),
        max_tokens: Some(256),
        ..Default::default()
    })
    .with_base_url(base);

    let (result, chunks) = stream_collect(&service).await;
    assert_eq!(result.expect("stream"), "Bonjour");
    assert_eq!(chunks, vec!["Bon", "jour"]);

    let request = server.await.unwrap();
    let lower = request.to_lowercase();
    assert!(request.starts_with("POST /v1/messages"));
    assert!(lower.contains("x-api-key: ak"));
    assert!(lower.contains("anthropic-version: 2023-06-01"));
    assert!(request.contains("\"system\":\"You are a helpful assistant.\""));
}

#[tokio::test]
async fn test_gemini_stream_reads_candidate_parts() {
    let body = concat!(
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Ciao\"}]}}]}\r\n\r\n",
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\" a tutti\"}]}}]}\r\n\r\n",
    )
    .to_string();
    let (base, server) = serve_once("200 OK", "text/event-stream", body).await;
    let service = GeminiService::new(GeminiConfig {
        api_key: "gk".into(),
        model: "gemini-pro".into(),
        ..Default::default()
    })
    .with_base_url(base);

    let (result, chunks) = stream_collect(&service).await;
    assert_eq!(result.expect("stream"), "Ciao a tutti");
    assert_eq!(chunks, vec!["Ciao", " a tutti"]);

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /v1beta/models/gemini-pro:streamGenerateContent?"));
    assert!(request.contains("alt=sse"));
    assert!(request.contains("key=gk"));
    assert!(request.contains("\"role\":\"user\""));
}

#[tokio::test]
async fn test_error_event_mid_stream_fails_after_partial_output() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        "data: {\"error\":{\"message\":\"Rate limit reached\",\"type\":\"tokens\"}}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" never\"}}]}\n\n",
    )
    .to_string();
    let (base, _server) = serve_once("200 OK", "text/event-stream", body).await;
    let service = GroqService::new(GroqConfig {
        api_key: "gsk".into(),
        model: "mixtral-8x7b-32768".into(),
        ..Default::default()
    })
    .with_base_url(base);

    let (result, chunks) = stream_collect(&service).await;
    assert_eq!(chunks, vec!["Hi"]);
    match result.unwrap_err() {
        ChatError::Upstream { provider, message } => {
            assert_eq!(provider, "Groq");
            assert_eq!(message, "Rate limit reached");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_error_body_with_ok_status_fails_complete() {
    let (base, _server) = serve_once(
        "200 OK",
        "application/json",
        r#"{"error":{"message":"model overloaded"}}"#.to_string(),
    )
    .await;
    let service = OpenAiService::new(openai_config()).with_base_url(base);

    let err = service.send_message(&history(), None).await.unwrap_err();
    assert!(
        matches!(err, ChatError::Upstream { ref message, .. } if message == "model overloaded"),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_azure_request_uses_deployment_path_and_api_key() {
    let body = concat!(
        "data: {\"choices\":[]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Azure\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" says hi\"}}]}\n\n",
        "data: [DONE]\n\n",
    )
    .to_string();
    let (base, server) = serve_once("200 OK", "text/event-stream", body).await;
    let service = AzureOpenAiService::new(AzureConfig {
        api_key: "az-key".into(),
        endpoint: format!("{}/", base),
        deployment_name: "gpt35".into(),
        ..Default::default()
    });

    let (result, chunks) = stream_collect(&service).await;
    assert_eq!(result.expect("stream"), "Azure says hi");
    assert_eq!(chunks, vec!["Azure", " says hi"]);

    let request = server.await.unwrap();
    let lower = request.to_lowercase();
    assert!(
        request.starts_with(
            "POST /openai/deployments/gpt35/chat/completions?api-version=2023-05-15 "
        ),
        "{}",
        request.lines().next().unwrap_or_default()
    );
    assert!(lower.contains("api-key: az-key"));
    assert!(!lower.contains("authorization:"));
    assert!(request.contains("\"stream\":true"));
}
