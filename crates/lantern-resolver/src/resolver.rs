use crate::backend::{IdDispatch, ResolverBackend};
use crate::single_flight::SingleFlight;
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use lantern_cache::{CacheLookup, ResolutionCache};
use lantern_core::{locator, ResolvedLocator, ResourceDescriptor, ResourceKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Default number of ids per network request chunk.
///
/// Bounds URL and query-string length; not a correctness parameter.
pub const DEFAULT_CHUNK_SIZE: usize = 300;

/// Primary resolution surface.
///
/// Given a list of descriptors, resolves each external id to its locator:
/// cache hits are answered immediately, misses are grouped into chunked
/// per-kind backend requests, and every backend answer (negatives
/// included) is written back to the cache. Failures are isolated per id
/// or per group; unresolved ids are simply absent from the result map.
pub struct BatchResolver<B: ?Sized, C: ?Sized> {
    backend: Arc<B>,
    cache: Arc<C>,
    chunk_size: usize,
    single_flight: SingleFlight<Option<String>>,
}

impl<B, C> BatchResolver<B, C>
where
    B: ResolverBackend + ?Sized,
    C: ResolutionCache + ?Sized,
{
    pub fn new(backend: Arc<B>, cache: Arc<C>) -> Self {
        Self {
            backend,
            cache,
            chunk_size: DEFAULT_CHUNK_SIZE,
            single_flight: SingleFlight::new(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Resolves `descriptors` to a map of external id → locator.
    ///
    /// Unresolvable ids (cached negatives, backend negatives, transient
    /// failures) are absent from the map. Completion order between ids is
    /// unspecified.
    pub async fn resolve(
        &self,
        descriptors: &[ResourceDescriptor],
    ) -> HashMap<String, ResolvedLocator> {
        self.resolve_with_progress(descriptors, |_| {}).await
    }

    /// Like [`BatchResolver::resolve`], reporting progress as a fraction
    /// that starts at 0, increases monotonically after every completed
    /// unit of work, and ends at 1 even when some ids never resolve.
    pub async fn resolve_with_progress(
        &self,
        descriptors: &[ResourceDescriptor],
        mut progress: impl FnMut(f64) + Send,
    ) -> HashMap<String, ResolvedLocator> {
        run_resolution(
            self.backend.as_ref(),
            self.cache.as_ref(),
            self.chunk_size,
            descriptors,
            &mut progress,
        )
        .await
    }

    /// Resolves one descriptor and returns the percent-encoded web path of
    /// its locator (`%40chan%3A1/stream`), the form redirect URLs are
    /// built from.
    ///
    /// Concurrent calls for the same descriptor (the same video observed
    /// by two event handlers within milliseconds) share one resolution
    /// attempt.
    pub async fn resolve_web_path(&self, descriptor: &ResourceDescriptor) -> Option<String> {
        let signature = descriptor.signature();
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.cache);
        let chunk_size = self.chunk_size;
        let descriptor = descriptor.clone();

        self.single_flight
            .run(&signature, move || {
                let fut: std::pin::Pin<Box<dyn std::future::Future<Output = Option<String>> + Send>> =
                    Box::pin(async move {
                        let id = descriptor.id.clone();
                        let descriptors = [descriptor];
                        let mut results = run_resolution(
                            backend.as_ref(),
                            cache.as_ref(),
                            chunk_size,
                            &descriptors,
                            &mut |_| {},
                        )
                        .await;

                        let resolved = results.remove(&id)?;
                        let segments = locator::parse(&resolved.locator);
                        if segments.is_empty() {
                            return None;
                        }
                        Some(locator::join_segments(&segments, true))
                    });
                fut
            })
            .await
    }
}

async fn run_resolution<B, C>(
    backend: &B,
    cache: &C,
    chunk_size: usize,
    descriptors: &[ResourceDescriptor],
    progress: &mut (dyn FnMut(f64) + Send),
) -> HashMap<String, ResolvedLocator>
where
    B: ResolverBackend + ?Sized,
    C: ResolutionCache + ?Sized,
{
    let mut results = HashMap::new();
    let mut misses = Vec::new();

    for descriptor in descriptors {
        match cache.get(&descriptor.id).await {
            Ok(CacheLookup::Hit(Some(cached))) => {
                trace!(id = %descriptor.id, "resolution cache hit");
                results.insert(
                    descriptor.id.clone(),
                    ResolvedLocator {
                        locator: cached,
                        kind: descriptor.kind,
                    },
                );
            }
            Ok(CacheLookup::Hit(None)) => {
                // A cached negative is resolved work: do not retry until
                // its TTL lapses, and keep it out of the result map.
                trace!(id = %descriptor.id, "cached negative, skipping");
            }
            Ok(CacheLookup::Miss) => misses.push(descriptor),
            Err(e) => {
                warn!(id = %descriptor.id, error = %e, "cache read failed, treating as miss");
                misses.push(descriptor);
            }
        }
    }

    progress(0.0);
    let total = misses.len();
    if total == 0 {
        progress(1.0);
        return results;
    }
    let mut processed = 0usize;

    for chunk in misses.chunks(chunk_size) {
        for kind in [ResourceKind::Channel, ResourceKind::Video] {
            let group: Vec<&ResourceDescriptor> =
                chunk.iter().copied().filter(|d| d.kind == kind).collect();
            if group.is_empty() {
                continue;
            }

            match backend.dispatch(kind) {
                IdDispatch::Joined { .. } => {
                    resolve_joined_group(backend, cache, kind, &group, &mut results).await;
                    processed += group.len();
                    progress(processed as f64 / total as f64);
                }
                IdDispatch::Single => {
                    let mut outcomes = stream::iter(group.iter().copied().map(|descriptor| {
                        resolve_single_descriptor(backend, kind, descriptor).boxed()
                    }))
                    .buffer_unordered(group.len());

                    while let Some((descriptor, outcome)) = outcomes.next().await {
                        match outcome {
                            Ok(answer) => {
                                let answer = answer.as_deref().map(normalize_locator);
                                cache_put(cache, &descriptor.id, answer.as_deref()).await;
                                if let Some(found) = answer {
                                    results.insert(
                                        descriptor.id.clone(),
                                        ResolvedLocator {
                                            locator: found,
                                            kind,
                                        },
                                    );
                                }
                            }
                            Err(e) => {
                                // Transient: uncached, eligible for retry
                                // on a later call.
                                debug!(id = %descriptor.id, error = %e, "id left unresolved");
                            }
                        }
                        processed += 1;
                        progress(processed as f64 / total as f64);
                    }
                }
            }
        }
    }

    progress(1.0);
    results
}

async fn resolve_single_descriptor<'a, B>(
    backend: &B,
    kind: ResourceKind,
    descriptor: &'a ResourceDescriptor,
) -> (&'a ResourceDescriptor, crate::error::Result<Option<String>>)
where
    B: ResolverBackend + ?Sized,
{
    (descriptor, backend.resolve_single(kind, &descriptor.id).await)
}

async fn resolve_joined_group<B, C>(
    backend: &B,
    cache: &C,
    kind: ResourceKind,
    group: &[&ResourceDescriptor],
    results: &mut HashMap<String, ResolvedLocator>,
) where
    B: ResolverBackend + ?Sized,
    C: ResolutionCache + ?Sized,
{
    let ids: Vec<String> = group.iter().map(|d| d.id.clone()).collect();
    match backend.resolve_group(kind, &ids).await {
        Ok(mapping) => {
            for id in &ids {
                let answer = mapping
                    .get(id)
                    .and_then(Option::as_deref)
                    .map(normalize_locator);
                cache_put(cache, id, answer.as_deref()).await;
                if let Some(found) = answer {
                    results.insert(
                        id.clone(),
                        ResolvedLocator {
                            locator: found,
                            kind,
                        },
                    );
                }
            }
        }
        Err(e) => {
            // The whole group stays unresolved and uncached; nothing here
            // aborts the other groups or chunks.
            warn!(kind = %kind, count = ids.len(), error = %e, "group resolution failed");
        }
    }
}

async fn cache_put<C>(cache: &C, id: &str, locator: Option<&str>)
where
    C: ResolutionCache + ?Sized,
{
    if let Err(e) = cache.put(id, locator).await {
        warn!(id = %id, error = %e, "cache write failed");
    }
}

/// Backends occasionally emit the legacy `#` delimiter between a claim
/// name and its id; canonical locators use `:`.
fn normalize_locator(locator: &str) -> String {
    locator.replace('#', ":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ResolverBackend;
    use crate::error::{ResolverError, Result};
    use async_trait::async_trait;
    use lantern_cache::{CacheError, CacheTtl, InMemoryResolutionCache, NoopResolutionCache};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockBackend {
        dispatch: IdDispatch,
        answers: HashMap<String, Option<String>>,
        transient: HashSet<String>,
        delay: Option<Duration>,
        group_calls: AtomicUsize,
        single_calls: AtomicUsize,
    }

    impl MockBackend {
        fn joined(answers: &[(&str, Option<&str>)]) -> Self {
            Self::build(IdDispatch::Joined { separator: ',' }, answers)
        }

        fn single(answers: &[(&str, Option<&str>)]) -> Self {
            Self::build(IdDispatch::Single, answers)
        }

        fn build(dispatch: IdDispatch, answers: &[(&str, Option<&str>)]) -> Self {
            Self {
                dispatch,
                answers: answers
                    .iter()
                    .map(|(id, locator)| (id.to_string(), locator.map(str::to_owned)))
                    .collect(),
                transient: HashSet::new(),
                delay: None,
                group_calls: AtomicUsize::new(0),
                single_calls: AtomicUsize::new(0),
            }
        }

        fn with_transient(mut self, ids: &[&str]) -> Self {
            self.transient = ids.iter().map(|id| id.to_string()).collect();
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> usize {
            self.group_calls.load(Ordering::SeqCst) + self.single_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResolverBackend for MockBackend {
        fn dispatch(&self, _kind: ResourceKind) -> IdDispatch {
            self.dispatch
        }

        async fn resolve_group(
            &self,
            _kind: ResourceKind,
            ids: &[String],
        ) -> Result<HashMap<String, Option<String>>> {
            self.group_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if ids.iter().any(|id| self.transient.contains(id)) {
                return Err(ResolverError::Status(500));
            }
            Ok(ids
                .iter()
                .map(|id| (id.clone(), self.answers.get(id).cloned().flatten()))
                .collect())
        }

        async fn resolve_single(&self, _kind: ResourceKind, id: &str) -> Result<Option<String>> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.transient.contains(id) {
                return Err(ResolverError::Status(500));
            }
            Ok(self.answers.get(id).cloned().flatten())
        }
    }

    fn resolver(
        backend: MockBackend,
    ) -> BatchResolver<MockBackend, InMemoryResolutionCache> {
        BatchResolver::new(Arc::new(backend), Arc::new(InMemoryResolutionCache::new()))
    }

    #[tokio::test]
    async fn resolves_and_memoizes_positive_results() {
        let resolver = resolver(MockBackend::joined(&[("abc", Some("lbry://show:1"))]));
        let descriptors = [ResourceDescriptor::video("abc")];

        let results = resolver.resolve(&descriptors).await;
        assert_eq!(
            results.get("abc"),
            Some(&ResolvedLocator {
                locator: "lbry://show:1".to_owned(),
                kind: ResourceKind::Video,
            })
        );

        // Second call is answered from the cache.
        let results = resolver.resolve(&descriptors).await;
        assert!(results.contains_key("abc"));
        assert_eq!(resolver.backend.calls(), 1);
    }

    #[tokio::test]
    async fn negative_results_are_memoized() {
        let resolver = resolver(MockBackend::joined(&[("zzz", None)]));
        let descriptors = [ResourceDescriptor::video("zzz")];

        let results = resolver.resolve(&descriptors).await;
        assert!(results.is_empty());

        // Within the negative TTL the backend is not asked again.
        let results = resolver.resolve(&descriptors).await;
        assert!(results.is_empty());
        assert_eq!(resolver.backend.calls(), 1);
    }

    #[tokio::test]
    async fn negative_ttl_elapse_triggers_retry() {
        let cache = InMemoryResolutionCache::with_ttl(CacheTtl {
            positive: Duration::from_secs(3600),
            negative: Duration::from_millis(20),
        });
        let backend = MockBackend::joined(&[("zzz", None)]);
        let resolver = BatchResolver::new(Arc::new(backend), Arc::new(cache));
        let descriptors = [ResourceDescriptor::video("zzz")];

        resolver.resolve(&descriptors).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        resolver.resolve(&descriptors).await;

        assert_eq!(resolver.backend.calls(), 2);
    }

    #[tokio::test]
    async fn chunking_bounds_request_size() {
        let answers: Vec<(String, Option<String>)> = (0..700)
            .map(|i| (format!("id{i}"), Some(format!("lbry://v{i}"))))
            .collect();
        let answer_refs: Vec<(&str, Option<&str>)> = answers
            .iter()
            .map(|(id, locator)| (id.as_str(), locator.as_deref()))
            .collect();
        let resolver = resolver(MockBackend::joined(&answer_refs)).with_chunk_size(300);

        let descriptors: Vec<ResourceDescriptor> = (0..700)
            .map(|i| ResourceDescriptor::video(format!("id{i}")))
            .collect();

        let mut fractions = Vec::new();
        let results = resolver
            .resolve_with_progress(&descriptors, |fraction| fractions.push(fraction))
            .await;

        assert_eq!(results.len(), 700);
        assert_eq!(resolver.backend.group_calls.load(Ordering::SeqCst), 3);

        assert_eq!(fractions.first(), Some(&0.0));
        assert_eq!(fractions.last(), Some(&1.0));
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]), "{fractions:?}");
    }

    #[tokio::test]
    async fn groups_by_kind_within_a_chunk() {
        let resolver = resolver(MockBackend::joined(&[
            ("vid", Some("lbry://v")),
            ("chan", Some("lbry://@c")),
        ]));
        let descriptors = [
            ResourceDescriptor::video("vid"),
            ResourceDescriptor::channel("chan"),
        ];

        let results = resolver.resolve(&descriptors).await;
        assert_eq!(results.len(), 2);
        // One request per kind even though both fit one chunk.
        assert_eq!(resolver.backend.group_calls.load(Ordering::SeqCst), 2);
        assert_eq!(results.get("chan").unwrap().kind, ResourceKind::Channel);
    }

    #[tokio::test]
    async fn single_dispatch_caches_negatives_but_not_transients() {
        let backend = MockBackend::single(&[
            ("abc", Some("lbry://show:1")),
            ("gone", None),
        ])
        .with_transient(&["flaky"]);
        let cache = Arc::new(InMemoryResolutionCache::new());
        let resolver = BatchResolver::new(Arc::new(backend), Arc::clone(&cache));

        let descriptors = [
            ResourceDescriptor::video("abc"),
            ResourceDescriptor::video("gone"),
            ResourceDescriptor::video("flaky"),
        ];
        let results = resolver.resolve(&descriptors).await;

        assert!(results.contains_key("abc"));
        assert!(!results.contains_key("gone"));
        assert!(!results.contains_key("flaky"));

        // The explicit negative is memoized; the transient failure is not.
        assert_eq!(
            cache.get("gone").await.unwrap(),
            CacheLookup::Hit(None)
        );
        assert!(cache.get("flaky").await.unwrap().is_miss());

        // Only the transient id hits the network again.
        resolver.resolve(&descriptors).await;
        assert_eq!(resolver.backend.single_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn group_failure_does_not_abort_other_groups() {
        let backend = MockBackend::joined(&[("vid", Some("lbry://v"))])
            .with_transient(&["badchan"]);
        let resolver = resolver(backend);

        let descriptors = [
            ResourceDescriptor::channel("badchan"),
            ResourceDescriptor::video("vid"),
        ];
        let results = resolver.resolve(&descriptors).await;

        assert_eq!(results.len(), 1);
        assert!(results.contains_key("vid"));
    }

    #[tokio::test]
    async fn locators_are_normalized_before_caching() {
        let cache = Arc::new(InMemoryResolutionCache::new());
        let backend = MockBackend::joined(&[("abc", Some("lbry://@chan#aa/ep#bb"))]);
        let resolver = BatchResolver::new(Arc::new(backend), Arc::clone(&cache));

        let results = resolver.resolve(&[ResourceDescriptor::video("abc")]).await;
        assert_eq!(results.get("abc").unwrap().locator, "lbry://@chan:aa/ep:bb");
        assert_eq!(
            cache.get("abc").await.unwrap(),
            CacheLookup::Hit(Some("lbry://@chan:aa/ep:bb".to_owned()))
        );
    }

    #[tokio::test]
    async fn cache_failures_degrade_to_plain_resolution() {
        struct FailingCache;

        #[async_trait]
        impl ResolutionCache for FailingCache {
            async fn get(&self, _id: &str) -> lantern_cache::Result<CacheLookup> {
                Err(CacheError::Unavailable("down".to_owned()))
            }
            async fn put(&self, _id: &str, _locator: Option<&str>) -> lantern_cache::Result<()> {
                Err(CacheError::Unavailable("down".to_owned()))
            }
            async fn clear_all(&self) -> lantern_cache::Result<()> {
                Ok(())
            }
            async fn sweep_expired(&self) -> lantern_cache::Result<u64> {
                Ok(0)
            }
        }

        let backend = MockBackend::joined(&[("abc", Some("lbry://show:1"))]);
        let resolver = BatchResolver::new(Arc::new(backend), Arc::new(FailingCache));

        let results = resolver.resolve(&[ResourceDescriptor::video("abc")]).await;
        assert!(results.contains_key("abc"));
    }

    #[tokio::test]
    async fn progress_reaches_one_when_nothing_resolves() {
        let backend = MockBackend::joined(&[]).with_transient(&["a", "b"]);
        let resolver = resolver(backend);
        let descriptors = [
            ResourceDescriptor::video("a"),
            ResourceDescriptor::video("b"),
        ];

        let mut fractions = Vec::new();
        let results = resolver
            .resolve_with_progress(&descriptors, |fraction| fractions.push(fraction))
            .await;

        assert!(results.is_empty());
        assert_eq!(fractions.first(), Some(&0.0));
        assert_eq!(fractions.last(), Some(&1.0));
    }

    #[tokio::test]
    async fn web_path_resolution_is_deduplicated() {
        // The no-op cache keeps every call on the network path, so the
        // call count shows coalescing rather than memoization.
        let backend = MockBackend::single(&[("abc", Some("lbry://@chan:aa/ep:bb"))])
            .with_delay(Duration::from_millis(50));
        let resolver = BatchResolver::new(Arc::new(backend), Arc::new(NoopResolutionCache));
        let descriptor = ResourceDescriptor::video("abc");

        let (a, b) = tokio::join!(
            resolver.resolve_web_path(&descriptor),
            resolver.resolve_web_path(&descriptor),
        );

        assert_eq!(a.as_deref(), Some("%40chan%3Aaa/ep%3Abb"));
        assert_eq!(b, a);
        assert_eq!(resolver.backend.calls(), 1);

        // The flight table drained, so the next call re-resolves.
        resolver.resolve_web_path(&descriptor).await;
        assert_eq!(resolver.backend.calls(), 2);
    }

    #[tokio::test]
    async fn web_path_is_none_for_unresolvable_ids() {
        let resolver = resolver(MockBackend::joined(&[("zzz", None)]));
        let descriptor = ResourceDescriptor::video("zzz");
        assert_eq!(resolver.resolve_web_path(&descriptor).await, None);
    }
}
