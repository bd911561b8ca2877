use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, Stream, StreamExt};

use super::{BoxError, Context, JsonObject};

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub headers: HashMap<String, Vec<String>>,
    pub status_code: u16,
}

/// 백엔드 호출 하나의 결과. 엔드포인트 단위로 하나로 병합됩니다.
#[derive(Default)]
pub struct Response {
    pub data: JsonObject,
    /// 구조화 표현으로 완전히 적재된 응답인지
    pub is_complete: bool,
    pub metadata: Metadata,
    /// no-op 인코딩 백엔드의 패스스루 스트림
    pub io: Option<Passthrough>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("data", &self.data)
            .field("is_complete", &self.is_complete)
            .field("metadata", &self.metadata)
            .field("io", &self.io.is_some())
            .finish()
    }
}

/// 요청 컨텍스트가 취소되면 닫히는 바이트 스트림 래퍼.
///
/// no-op 패스스루 응답의 바디 읽기를 부모 취소에 묶어 둡니다.
pub struct Passthrough {
    done: BoxFuture<'static, ()>,
    inner: BoxStream<'static, Result<Bytes, BoxError>>,
}

impl Passthrough {
    pub fn new<S>(ctx: &Context, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BoxError>> + Send + 'static,
    {
        let watcher = ctx.clone();
        Self {
            done: async move { watcher.done().await }.boxed(),
            inner: stream.boxed(),
        }
    }

    /// 남은 바이트를 모두 모읍니다. 테스트와 어댑터 편의용.
    pub async fn collect(mut self) -> Result<Bytes, BoxError> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }
}

impl Stream for Passthrough {
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done.poll_unpin(cx).is_ready() {
            return Poll::Ready(None);
        }
        this.inner.poll_next_unpin(cx)
    }
}
