#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rvoip_mobile_core::mock::{MockAudio, MockEngine, MockProvider};
use rvoip_mobile_core::{
    CallSession, CallState, Credentials, MobileClient, MobileClientBuilder, MobileConfig, SessionId,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub client: MobileClient,
    pub engine: Arc<MockEngine>,
    pub provider: Arc<MockProvider>,
    pub audio: Arc<MockAudio>,
}

impl Harness {
    /// Core with a host call UI that echoes its requests back
    pub async fn with_call_ui(config: MobileConfig) -> Self {
        let harness = Self::build(config, true).await;
        harness.provider.attach(harness.client.clone());
        harness
    }

    /// Core with a host call UI that never answers requests
    pub async fn with_silent_call_ui(config: MobileConfig) -> Self {
        Self::build(config, true).await
    }

    /// Core driving signaling directly
    pub async fn without_call_ui(config: MobileConfig) -> Self {
        Self::build(config.with_native_call_ui(false), false).await
    }

    async fn build(config: MobileConfig, with_provider: bool) -> Self {
        init_tracing();
        let engine = Arc::new(MockEngine::new());
        let provider = Arc::new(MockProvider::new());
        let audio = Arc::new(MockAudio::new());

        let mut builder = MobileClientBuilder::new()
            .config(config)
            .engine(engine.clone())
            .audio(audio.clone());
        if with_provider {
            builder = builder.call_ui(provider.clone());
        }
        let client = builder.build().await.expect("core should start");

        Self {
            client,
            engine,
            provider,
            audio,
        }
    }

    /// Register, wait for confirmation and grant the microphone
    pub async fn login(&self) {
        self.client
            .register(Credentials::new("alice", "secret", "example.com"))
            .await
            .expect("register submitted");
        self.client
            .wait_registered(Duration::from_secs(5))
            .await
            .expect("registered");
        self.client.set_audio_permission(true).await.unwrap();
    }

    pub async fn session(&self, session_id: SessionId) -> Option<CallSession> {
        self.client.session(session_id).await.unwrap()
    }

    pub async fn state_of(&self, session_id: SessionId) -> Option<CallState> {
        self.session(session_id).await.map(|s| s.state)
    }

    /// Wait until `session_id` reaches `state`
    pub async fn wait_state(&self, session_id: SessionId, state: CallState) {
        eventually(move || async move { self.state_of(session_id).await == Some(state) }).await;
    }

    /// Dial and let the far end answer
    pub async fn connected_outgoing(&self, address: &str) -> SessionId {
        let session_id = self.client.dial(address).await.expect("dial");
        eventually(move || async move { self.session(session_id).await.is_some() }).await;
        let handle = self.engine.last_outgoing().expect("outgoing handle");
        self.engine.remote_answer(handle);
        self.wait_state(session_id, CallState::Connected).await;
        session_id
    }

    /// Let an INVITE arrive and return the session it created
    pub async fn incoming(&self, address: &str, token: Option<&str>) -> SessionId {
        let before: Vec<SessionId> = self
            .client
            .sessions()
            .await
            .unwrap()
            .iter()
            .map(|s| s.session_id)
            .collect();
        self.engine.incoming_call(address, token);

        let mut found = None;
        for _ in 0..200 {
            let sessions = self.client.sessions().await.unwrap();
            found = sessions
                .iter()
                .find(|s| !before.contains(&s.session_id) && s.remote_address == address)
                .map(|s| s.session_id);
            if found.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        found.expect("incoming session should appear")
    }
}

/// Poll `check` until it holds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
