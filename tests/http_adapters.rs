mod common;

use futures::{StreamExt, TryStreamExt};

use rag_harness::config::{parse_config, EmbeddingConfig, LlmConfig};
use rag_harness::embedding::{embed_all, Embedder, OpenAiEmbedder};
use rag_harness::llm::{ChatMessage, ChatModel, OpenAiChatModel};
use rag_harness::RagError;

fn embedding_config(url: &str) -> EmbeddingConfig {
    parse_config(&format!(
        "[index]\npath = \"unused.sqlite\"\n\n[embedding]\ndims = {}\nurl = \"{}\"\n",
        common::DIMS,
        url
    ))
    .unwrap()
    .embedding
}

fn llm_config(url: &str) -> LlmConfig {
    LlmConfig {
        url: Some(url.to_string()),
        max_tokens: Some(64),
        ..LlmConfig::default()
    }
}

#[tokio::test]
async fn openai_embeddings_restore_input_order() {
    let base = common::serve(common::mock_api()).await;
    let embedder =
        OpenAiEmbedder::new(&embedding_config(&format!("{}/v1", base)), common::API_KEY).unwrap();

    let texts: Vec<String> = [
        "Aetherfloris Ventus",
        "Noctis Umbraherba",
        "botanical section",
        "a single drop",
        "mountain winds",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let vectors = embed_all(&embedder, &texts, 2, 3).await.unwrap();
    assert_eq!(vectors.len(), texts.len());
    for (text, vector) in texts.iter().zip(&vectors) {
        assert_eq!(vector, &common::hash_embedding(text, common::DIMS));
    }
}

#[tokio::test]
async fn openai_embeddings_trailing_slash_in_url() {
    let base = common::serve(common::mock_api()).await;
    let embedder =
        OpenAiEmbedder::new(&embedding_config(&format!("{}/v1/", base)), common::API_KEY).unwrap();
    let v = embedder.embed_query("shadow").await.unwrap();
    assert_eq!(v.len(), common::DIMS);
}

#[tokio::test]
async fn embeddings_429_is_rate_limit() {
    let base = common::serve(common::mock_api()).await;
    let embedder = OpenAiEmbedder::new(
        &embedding_config(&format!("{}/throttled", base)),
        common::API_KEY,
    )
    .unwrap();

    let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
    assert!(matches!(err, RagError::RateLimit { .. }), "got {:?}", err);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn embeddings_5xx_is_retryable_service_error() {
    let base = common::serve(common::mock_api()).await;
    let embedder = OpenAiEmbedder::new(
        &embedding_config(&format!("{}/broken", base)),
        common::API_KEY,
    )
    .unwrap();

    let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
    assert!(matches!(err, RagError::Service { retryable: true, .. }), "got {:?}", err);
}

#[tokio::test]
async fn embeddings_bad_key_is_not_retryable() {
    let base = common::serve(common::mock_api()).await;
    let embedder =
        OpenAiEmbedder::new(&embedding_config(&format!("{}/v1", base)), "wrong-key").unwrap();

    let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
    assert!(matches!(err, RagError::Service { retryable: false, .. }), "got {:?}", err);
}

#[tokio::test]
async fn chat_completion_returns_message_content() {
    let base = common::serve(common::mock_api()).await;
    let model =
        OpenAiChatModel::new(&llm_config(&format!("{}/v1", base)), Some(common::API_KEY.into()))
            .unwrap();

    let answer = model
        .complete(&[
            ChatMessage::system("be brief"),
            ChatMessage::user("What is Aetherfloris Ventus?"),
        ])
        .await
        .unwrap();
    assert_eq!(answer, "echo: What is Aetherfloris Ventus?");
}

#[tokio::test]
async fn chat_stream_yields_fragments_in_order_until_done() {
    let base = common::serve(common::mock_api()).await;
    let model =
        OpenAiChatModel::new(&llm_config(&format!("{}/v1", base)), Some(common::API_KEY.into()))
            .unwrap();

    let stream = model
        .stream(&[ChatMessage::user("a single drop")])
        .await
        .unwrap();
    let fragments: Vec<String> = stream.try_collect().await.unwrap();

    assert_eq!(fragments, vec!["echo:", " a", " single", " drop"]);
    assert_eq!(fragments.concat(), "echo: a single drop");
}

async fn drain(base: &str, prefix: &str) -> (Vec<String>, Option<RagError>) {
    let model = OpenAiChatModel::new(
        &llm_config(&format!("{}/{}", base, prefix)),
        Some(common::API_KEY.into()),
    )
    .unwrap();
    let mut stream = model.stream(&[ChatMessage::user("hi")]).await.unwrap();
    let mut fragments = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => fragments.push(fragment),
            Err(e) => {
                assert!(stream.next().await.is_none(), "stream continued after error");
                return (fragments, Some(e));
            }
        }
    }
    (fragments, None)
}

#[tokio::test]
async fn chat_stream_error_payload_fails_the_stream() {
    let base = common::serve(common::mock_api()).await;
    let (fragments, err) = drain(&base, "failing").await;

    assert_eq!(fragments, vec!["Partial"]);
    let err = err.expect("error payload must surface");
    assert!(matches!(err, RagError::Service { retryable: true, .. }), "got {:?}", err);
    assert!(err.to_string().contains("The server had an error"));
}

#[tokio::test]
async fn chat_stream_without_done_is_an_error() {
    let base = common::serve(common::mock_api()).await;
    let (fragments, err) = drain(&base, "truncated").await;

    assert_eq!(fragments, vec!["Partial"]);
    let err = err.expect("truncated stream must surface");
    assert!(err.to_string().contains("stream ended before [DONE]"), "got {:?}", err);
}

#[tokio::test]
async fn chat_completion_without_content_is_an_error() {
    let base = common::serve(common::mock_api()).await;
    let model = OpenAiChatModel::new(
        &llm_config(&format!("{}/empty", base)),
        Some(common::API_KEY.into()),
    )
    .unwrap();

    let err = model
        .complete(&[ChatMessage::user("hi")])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Service { retryable: false, .. }), "got {:?}", err);
    assert!(err.to_string().contains("response has no content"));
}

#[tokio::test]
async fn chat_429_is_rate_limit() {
    let base = common::serve(common::mock_api()).await;
    let model = OpenAiChatModel::new(
        &llm_config(&format!("{}/throttled", base)),
        Some(common::API_KEY.into()),
    )
    .unwrap();

    let err = match model.stream(&[ChatMessage::user("hi")]).await {
        Ok(_) => panic!("expected a rate limit error"),
        Err(e) => e,
    };
    assert!(matches!(err, RagError::RateLimit { .. }), "got {:?}", err);

    let err = model
        .complete(&[ChatMessage::user("hi")])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::RateLimit { .. }));
}

#[tokio::test]
async fn unreachable_service_is_transport_error() {
    // Bind then drop a listener to get a port with nothing behind it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let embedder = OpenAiEmbedder::new(
        &embedding_config(&format!("http://{}/v1", addr)),
        common::API_KEY,
    )
    .unwrap();
    let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
    assert!(matches!(err, RagError::Service { retryable: true, .. }), "got {:?}", err);
}
