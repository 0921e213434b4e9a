//! A hand-written adapter for the sample service, the way a code generator
//! would emit it, plus helpers shared by the integration tests.

#![allow(dead_code)]

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use exobridge::*;
use neowire::Frame;
use serde::Deserialize;
use serde::Serialize;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRequest {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResponse {
    pub message: String,
}

exobridge::portable!(SampleRequest => "SampleRequest", SampleResponse => "SampleResponse");

pub fn request(message: &str) -> SampleRequest {
    SampleRequest { message: message.to_string() }
}

// ============================================================================
//  SampleService<T>
// ============================================================================

#[async_trait]
pub trait SampleService<T: Portable>: BridgeService {
    fn ping(&self, request: SampleRequest) -> Result<SampleResponse>;
    async fn reduce(&self, items: Vec<T>) -> Result<T>;
}

pub struct SampleServiceAdapter<T> {
    contextual_request: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Portable> SampleServiceAdapter<T> {
    pub fn new() -> Self {
        Self { contextual_request: false, _marker: PhantomData }
    }

    /// Declares `ping`'s parameter `@Contextual`, so its serializer must come
    /// from the endpoint's module.
    pub fn with_contextual_request() -> Self {
        Self { contextual_request: true, _marker: PhantomData }
    }
}

impl<T: Portable> ServiceAdapter for SampleServiceAdapter<T> {
    type Service = dyn SampleService<T>;

    fn serial_name(&self) -> &str {
        "SampleService"
    }

    fn type_bindings(&self) -> TypeBindings {
        TypeBindings::new().bind_type::<T>("T")
    }

    fn register_serializers(&self, module: &mut SerializersModule) {
        if !self.contextual_request {
            module.register_default::<SampleRequest>();
        }
        module
            .register_default::<SampleResponse>()
            .register_default::<T>()
            .register_default::<Vec<T>>();
    }

    fn functions(&self) -> Vec<FunctionDecl<dyn SampleService<T>>> {
        let request = if self.contextual_request {
            TypeRef::contextual(TypeRef::named("SampleRequest"))
        } else {
            TypeRef::named("SampleRequest")
        };

        vec![
            FunctionDecl::<dyn SampleService<T>>::returning(
                "ping",
                vec![request],
                TypeRef::named("SampleResponse"),
                |s, mut args| Ok(pack(s.ping(args.take(0)?)?)),
            ),
            FunctionDecl::<dyn SampleService<T>>::suspending(
                "reduce",
                vec![TypeRef::list(TypeRef::param("T"))],
                TypeRef::param("T"),
                |s, mut args| async move {
                    let items: Vec<T> = args.take(0)?;
                    Ok::<_, Error>(pack(s.reduce(items).await?))
                },
            ),
        ]
    }

    fn outbound_service(&self, handler: OutboundCallHandler<dyn SampleService<T>>) -> Arc<dyn SampleService<T>> {
        Arc::new(SampleServiceProxy { handler })
    }
}

pub struct SampleServiceProxy<T: Portable> {
    handler: OutboundCallHandler<dyn SampleService<T>>,
}

impl<T: Portable> BridgeService for SampleServiceProxy<T> {
    fn close(&self) -> Result<()> {
        self.handler.close()
    }
}

#[async_trait]
impl<T: Portable> SampleService<T> for SampleServiceProxy<T> {
    fn ping(&self, request: SampleRequest) -> Result<SampleResponse> {
        self.handler.call(0, &[&request])
    }

    async fn reduce(&self, items: Vec<T>) -> Result<T> {
        let call = self.handler.call_suspending(1, &[&items]);
        call.await
    }
}

// ============================================================================
//  SampleServiceV2<T>: one method inserted before `reduce`
// ============================================================================

#[async_trait]
pub trait SampleServiceV2<T: Portable>: BridgeService {
    fn ping(&self, request: SampleRequest) -> Result<SampleResponse>;
    fn echo(&self, text: String) -> Result<String>;
    async fn reduce(&self, items: Vec<T>) -> Result<T>;
}

pub struct SampleServiceV2Adapter<T>(PhantomData<fn() -> T>);

impl<T: Portable> SampleServiceV2Adapter<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: Portable> ServiceAdapter for SampleServiceV2Adapter<T> {
    type Service = dyn SampleServiceV2<T>;

    fn serial_name(&self) -> &str {
        "SampleService"
    }

    fn type_bindings(&self) -> TypeBindings {
        TypeBindings::new().bind_type::<T>("T")
    }

    fn register_serializers(&self, module: &mut SerializersModule) {
        module
            .register_default::<SampleRequest>()
            .register_default::<SampleResponse>()
            .register_default::<T>()
            .register_default::<Vec<T>>();
    }

    fn functions(&self) -> Vec<FunctionDecl<dyn SampleServiceV2<T>>> {
        vec![
            FunctionDecl::<dyn SampleServiceV2<T>>::returning(
                "ping",
                vec![TypeRef::named("SampleRequest")],
                TypeRef::named("SampleResponse"),
                |s, mut args| Ok(pack(s.ping(args.take(0)?)?)),
            ),
            FunctionDecl::<dyn SampleServiceV2<T>>::returning(
                "echo",
                vec![TypeRef::named("String")],
                TypeRef::named("String"),
                |s, mut args| Ok(pack(s.echo(args.take(0)?)?)),
            ),
            FunctionDecl::<dyn SampleServiceV2<T>>::suspending(
                "reduce",
                vec![TypeRef::list(TypeRef::param("T"))],
                TypeRef::param("T"),
                |s, mut args| async move {
                    let items: Vec<T> = args.take(0)?;
                    Ok::<_, Error>(pack(s.reduce(items).await?))
                },
            ),
        ]
    }

    fn outbound_service(&self, handler: OutboundCallHandler<dyn SampleServiceV2<T>>) -> Arc<dyn SampleServiceV2<T>> {
        Arc::new(SampleServiceV2Proxy { handler })
    }
}

pub struct SampleServiceV2Proxy<T: Portable> {
    handler: OutboundCallHandler<dyn SampleServiceV2<T>>,
}

impl<T: Portable> BridgeService for SampleServiceV2Proxy<T> {
    fn close(&self) -> Result<()> {
        self.handler.close()
    }
}

#[async_trait]
impl<T: Portable> SampleServiceV2<T> for SampleServiceV2Proxy<T> {
    fn ping(&self, request: SampleRequest) -> Result<SampleResponse> {
        self.handler.call(0, &[&request])
    }

    fn echo(&self, text: String) -> Result<String> {
        self.handler.call(1, &[&text])
    }

    async fn reduce(&self, items: Vec<T>) -> Result<T> {
        let call = self.handler.call_suspending(2, &[&items]);
        call.await
    }
}

// ============================================================================
//  Implementations
// ============================================================================

/// Answers pings and sums numbers, optionally after a delay of one
/// millisecond per item.
#[derive(Default)]
pub struct SummingSample {
    pub delay_per_item: bool,
    pub closed: Mutex<bool>,
}

impl BridgeService for SummingSample {
    fn close(&self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

#[async_trait]
impl SampleService<i64> for SummingSample {
    fn ping(&self, request: SampleRequest) -> Result<SampleResponse> {
        Ok(SampleResponse { message: format!("pong: {}", request.message) })
    }

    async fn reduce(&self, items: Vec<i64>) -> Result<i64> {
        if self.delay_per_item {
            tokio::time::sleep(Duration::from_millis(items.len() as u64)).await;
        }
        Ok(items.into_iter().sum())
    }
}

/// Concatenates strings.
pub struct JoiningSample;

impl BridgeService for JoiningSample {}

#[async_trait]
impl SampleService<String> for JoiningSample {
    fn ping(&self, request: SampleRequest) -> Result<SampleResponse> {
        Ok(SampleResponse { message: request.message.to_uppercase() })
    }

    async fn reduce(&self, items: Vec<String>) -> Result<String> {
        tokio::task::yield_now().await;
        Ok(items.concat())
    }
}

/// Fails every `reduce`: with an error for an empty list, with a panic otherwise.
pub struct FailingSample;

impl BridgeService for FailingSample {}

#[async_trait]
impl SampleService<i64> for FailingSample {
    fn ping(&self, _request: SampleRequest) -> Result<SampleResponse> {
        Err(Error::Application("ping refused".into()))
    }

    async fn reduce(&self, items: Vec<i64>) -> Result<i64> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        if items.is_empty() {
            return Err(anyhow::anyhow!("cannot reduce an empty list").into());
        }
        panic!("reduce blew up on {} items", items.len());
    }
}

// ============================================================================
//  Wiring
// ============================================================================

/// Channel that records every frame before delivering it.
pub struct RecordingChannel {
    inner: LocalChannel,
    pub frames: Mutex<Vec<Frame>>,
}

impl RecordingChannel {
    pub fn new(target: &Arc<Endpoint>) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalChannel::new(Arc::downgrade(target)),
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }
}

impl CallChannel for RecordingChannel {
    fn call(&self, payload: &[u8]) -> std::result::Result<Vec<u8>, TransportError> {
        if let Ok(frame) = Frame::decode(payload) {
            self.frames.lock().unwrap().push(frame);
        }
        self.inner.call(payload)
    }
}

pub struct Pair {
    pub host: Arc<Endpoint>,
    pub guest: Arc<Endpoint>,
    /// Frames the host sends to the guest.
    pub host_out: Arc<RecordingChannel>,
    /// Frames the guest sends to the host.
    pub guest_out: Arc<RecordingChannel>,
}

pub fn pair() -> Pair {
    pair_with(Endpoint::builder("host"), Endpoint::builder("guest"))
}

pub fn pair_with(host: EndpointBuilder, guest: EndpointBuilder) -> Pair {
    init_tracing();
    let host = host.build();
    let guest = guest.build();
    let host_out = RecordingChannel::new(&guest);
    let guest_out = RecordingChannel::new(&host);
    host.connect(host_out.clone()).unwrap();
    guest.connect(guest_out.clone()).unwrap();
    Pair { host, guest, host_out, guest_out }
}

/// Binds a summing sample service on the host and returns it with a guest proxy.
pub fn summing(pair: &Pair, delay_per_item: bool) -> (Arc<SummingSample>, Arc<dyn SampleService<i64>>) {
    let real = Arc::new(SummingSample { delay_per_item, ..Default::default() });
    let service: Arc<dyn SampleService<i64>> = real.clone();
    pair.host.bind("sample", &SampleServiceAdapter::<i64>::new(), service).unwrap();
    let proxy = pair.guest.take("sample", &SampleServiceAdapter::<i64>::new()).unwrap();
    (real, proxy)
}
