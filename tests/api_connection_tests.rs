use meal_planner::api_connection::{
    connection::ApiConnectionError,
    endpoints::{ChatCompletionRequest, ChatMessage, Provider, ResponseFormat},
    ImageGenerator, ReplyFormat, TextGenerator,
};
use meal_planner::config::{StageConfig, DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL};
use meal_planner::stages::model_call::{parse_reply, ModelReply};
use dotenv::dotenv;
use std::env;

const TEST_API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";
const MISSING_KEY_ENV_VAR: &str = "THIS_KEY_SHOULD_NOT_EXIST_IN_ENV_ABXYZ";

fn setup_test_environment() {
    dotenv().ok();
}

fn api_key_available(test_name: &str) -> bool {
    setup_test_environment();
    if env::var(TEST_API_KEY_ENV_VAR).is_err() {
        println!("Skipping {}: {} not set.", test_name, TEST_API_KEY_ENV_VAR);
        return false;
    }
    true
}

#[tokio::test]
async fn test_missing_api_key_error() {
    setup_test_environment();
    let provider = Provider::openrouter(MISSING_KEY_ENV_VAR);
    let request = ChatCompletionRequest {
        model: DEFAULT_TEXT_MODEL.to_string(),
        messages: vec![ChatMessage::user("Hello")],
        response_format: None,
        modalities: None,
        temperature: None,
        max_tokens: None,
    };
    let result = provider.call_chat_completion(request).await;
    assert!(matches!(result, Err(ApiConnectionError::MissingApiKey(_))));
    if let Err(ApiConnectionError::MissingApiKey(key_name)) = result {
        assert_eq!(key_name, MISSING_KEY_ENV_VAR);
    }
}

#[tokio::test]
async fn test_generators_report_missing_api_key() {
    setup_test_environment();
    let provider = Provider::openrouter(MISSING_KEY_ENV_VAR);

    let text = provider
        .generate_text("Hello", &StageConfig::new(DEFAULT_TEXT_MODEL, 0.3, 50), ReplyFormat::Json)
        .await;
    assert!(matches!(text, Err(ApiConnectionError::MissingApiKey(_))));

    let image = provider
        .generate_image("A bowl of rice", &StageConfig::new(DEFAULT_IMAGE_MODEL, 0.9, 50))
        .await;
    assert!(matches!(image, Err(ApiConnectionError::MissingApiKey(_))));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_network_error() {
    unsafe {
        env::set_var("MEAL_PLANNER_TEST_DUMMY_KEY", "not-a-real-key");
    }
    // Port 9 (discard) on localhost is expected to refuse connections.
    let provider = Provider::openrouter_with_base_url("MEAL_PLANNER_TEST_DUMMY_KEY", "http://127.0.0.1:9/api/v1");
    let result = provider
        .generate_text("Hello", &StageConfig::new(DEFAULT_TEXT_MODEL, 0.3, 50), ReplyFormat::PlainText)
        .await;
    assert!(matches!(result, Err(ApiConnectionError::NetworkError(_))));
}

#[tokio::test]
#[ignore]
async fn test_successful_plain_text_call() {
    if !api_key_available("test_successful_plain_text_call") {
        return;
    }

    let provider = Provider::openrouter(TEST_API_KEY_ENV_VAR);
    let result = provider
        .generate_text(
            "What is the capital of France? Respond concisely.",
            &StageConfig::new(DEFAULT_TEXT_MODEL, 0.7, 100),
            ReplyFormat::PlainText,
        )
        .await;
    assert!(result.is_ok(), "API call failed: {:?}", result.err());
    assert!(result.unwrap().to_lowercase().contains("paris"));
}

#[tokio::test]
#[ignore]
async fn test_successful_json_call_parses() {
    if !api_key_available("test_successful_json_call_parses") {
        return;
    }

    let provider = Provider::openrouter(TEST_API_KEY_ENV_VAR);
    let result = provider
        .generate_text(
            "Suggest one quick side dish. Respond as {\"name\": string, \"cooking_time\": number}.",
            &StageConfig::new(DEFAULT_TEXT_MODEL, 0.5, 300),
            ReplyFormat::Json,
        )
        .await;
    assert!(result.is_ok(), "API call failed: {:?}", result.err());

    match parse_reply(&result.unwrap()) {
        ModelReply::Parsed(object) => assert!(object.contains_key("name")),
        ModelReply::Unusable(reason) => panic!("reply was not usable JSON: {}", reason),
    }
}

#[tokio::test]
#[ignore]
async fn test_api_error_with_invalid_key() {
    setup_test_environment();

    const INVALID_KEY_ENV_NAME_FOR_THIS_TEST: &str = "ENV_VAR_WITH_BAD_KEY_VALUE";
    unsafe {
        env::set_var(
            INVALID_KEY_ENV_NAME_FOR_THIS_TEST,
            "this_is_a_deliberately_bad_api_key_string_for_testing",
        );
    }

    let provider = Provider::openrouter(INVALID_KEY_ENV_NAME_FOR_THIS_TEST);
    let request = ChatCompletionRequest {
        model: DEFAULT_TEXT_MODEL.to_string(),
        messages: vec![ChatMessage::user("Hello")],
        response_format: Some(ResponseFormat::json_object()),
        modalities: None,
        temperature: None,
        max_tokens: Some(10),
    };

    let result = provider.call_chat_completion(request).await;
    match result {
        Err(ApiConnectionError::ApiError { status, .. }) => {
            assert!(status.is_client_error(), "expected a 4xx status, got {}", status);
        }
        other => panic!("expected an API error, got {:?}", other),
    }

    unsafe {
        env::remove_var(INVALID_KEY_ENV_NAME_FOR_THIS_TEST);
    }
}

#[tokio::test]
#[ignore]
async fn test_successful_image_generation() {
    if !api_key_available("test_successful_image_generation") {
        return;
    }

    let provider = Provider::openrouter(TEST_API_KEY_ENV_VAR);
    let image = provider
        .generate_image(
            "Professional food photography of a bowl of miso soup, natural lighting",
            &StageConfig::new(DEFAULT_IMAGE_MODEL, 0.9, 500),
        )
        .await;
    assert!(image.is_ok(), "image generation failed: {:?}", image.err());
    let image = image.unwrap();
    assert!(image.url.starts_with("data:") || image.url.starts_with("http"));
}
