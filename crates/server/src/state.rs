//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use voice_gateway_agent::{CallConversationConfig, TextResponder, VoiceAgent};
use voice_gateway_config::Settings;
use voice_gateway_core::EventPublisher;
use voice_gateway_persistence::ConversationStore;
use voice_gateway_pipeline::{
    DemoSynthesizer, ElevenLabsSynthesizer, SpeechSynthesizer, TtsConfig, TurnControllerConfig,
};

use crate::media::{DeepgramRecognizers, DemoRecognizers, RecognizerFactory};
use crate::session::CallSessionManager;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    /// Connected calls
    pub calls: Arc<CallSessionManager>,
    /// Conversation store (ScyllaDB or in-memory)
    pub store: Arc<dyn ConversationStore>,
    pub agent: Arc<VoiceAgent>,
    /// SMS and demo conversations
    pub text: Arc<TextResponder>,
    pub publisher: Arc<dyn EventPublisher>,
    /// Opens one recognizer per call
    pub recognizers: Arc<dyn RecognizerFactory>,
    /// Shared by all calls; opens one stream per response
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Speaks app replies in the app's output format
    pub app_synthesizer: Arc<dyn SpeechSynthesizer>,
    started_at: Instant,
}

impl AppState {
    /// State with vendor media in live mode and offline media in demo mode
    pub fn new(
        config: Settings,
        store: Arc<dyn ConversationStore>,
        agent: Arc<VoiceAgent>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let recognizers: Arc<dyn RecognizerFactory>;
        let synthesizer: Arc<dyn SpeechSynthesizer>;
        let app_synthesizer: Arc<dyn SpeechSynthesizer>;
        if config.demo {
            recognizers = Arc::new(DemoRecognizers);
            synthesizer = Arc::new(DemoSynthesizer::new());
            app_synthesizer = synthesizer.clone();
        } else {
            let tts = TtsConfig::from_settings(&config.tts);
            recognizers = Arc::new(DeepgramRecognizers::from_settings(&config.stt, &config.app));
            app_synthesizer = Arc::new(ElevenLabsSynthesizer::new(TtsConfig {
                output_format: config.app.output_format.clone(),
                ..tts.clone()
            }));
            synthesizer = Arc::new(ElevenLabsSynthesizer::new(tts));
        }

        let text = Arc::new(TextResponder::new(
            agent.clone(),
            store.clone(),
            publisher.clone(),
            &config.agent,
        ));
        let calls = Arc::new(CallSessionManager::new(
            config.server.max_calls,
            Duration::from_secs(config.server.call_idle_timeout_secs),
        ));

        Self {
            config: Arc::new(config),
            calls,
            store,
            agent,
            text,
            publisher,
            recognizers,
            synthesizer,
            app_synthesizer,
            started_at: Instant::now(),
        }
    }

    /// Replace the speech vendors for calls and the app
    pub fn with_media(
        mut self,
        recognizers: Arc<dyn RecognizerFactory>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        self.recognizers = recognizers;
        self.app_synthesizer = synthesizer.clone();
        self.synthesizer = synthesizer;
        self
    }

    pub fn is_demo(&self) -> bool {
        self.config.demo
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn controller_config(&self) -> TurnControllerConfig {
        TurnControllerConfig::from_settings(&self.config.tts)
    }

    pub fn conversation_config(&self) -> CallConversationConfig {
        CallConversationConfig::from_settings(&self.config.agent)
    }

    /// `wss://` URL Twilio streams call audio to
    pub fn media_stream_url(&self) -> String {
        format!("wss://{}/twilio/media", self.config.server.public_domain)
    }
}
