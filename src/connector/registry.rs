use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::connector::string_reassembly::{StringCallback, StringSubscription};
use crate::error::XPlaneError;
use crate::messaging::frames::DataRefRequest;

/// The value that a subscription reports before the simulator sent anything
pub const UNINITIALIZED_VALUE: f32 = f32::MIN;

/// Identifies one registered callback, so that it can be unsubscribed individually.
///  Handles are unique for the lifetime of the process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SubscriptionHandle(pub u64);

impl SubscriptionHandle {
    fn next() -> SubscriptionHandle {
        static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
        SubscriptionHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Allocates a dataref id. Ids are unique across all connectors in the process, so that a
///  late response for an unsubscribed id can never be attributed to a newer subscription.
pub fn allocate_id() -> i32 {
    static NEXT_ID: AtomicI32 = AtomicI32::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataRefSnapshot {
    pub id: i32,
    pub path: Arc<str>,
    pub frequency: i32,
    /// `Some` if this dataref is one character of a string dataref
    pub character_position: Option<usize>,
    pub value: f32,
    pub initialized: bool,
}

pub type DataRefCallback = Arc<dyn Fn(&DataRefSnapshot) + Send + Sync>;

/// Where a subscription is in its lifecycle:
///
/// ```ascii
///  Registered -> Requested -> Active -> Stale -> Requested -> ...
/// ```
///
/// Anything that is not `Active` is requested (again) by the next scheduler tick.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscriptionState {
    /// never requested
    Registered,
    /// requested, no value received since
    Requested,
    /// received a value within the maximum age
    Active,
    /// the last value is older than the maximum age, and it was not requested since
    Stale,
}

#[derive(Clone)]
struct CharacterSlot {
    position: usize,
    string: Arc<StringSubscription>,
}

struct Subscription {
    id: i32,
    path: Arc<str>,
    frequency: i32,
    character_slot: Option<CharacterSlot>,
    value: f32,
    initialized: bool,
    last_update: Option<Instant>,
    last_request: Option<Instant>,
    callbacks: Vec<(SubscriptionHandle, DataRefCallback)>,
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subscription{{id:{},path:{:?},frequency:{},value:{}}}", self.id, self.path, self.frequency, self.value)
    }
}

impl Subscription {
    fn new(path: Arc<str>, frequency: i32, character_slot: Option<CharacterSlot>) -> Subscription {
        Subscription {
            id: allocate_id(),
            path,
            frequency,
            character_slot,
            value: UNINITIALIZED_VALUE,
            initialized: false,
            last_update: None,
            last_request: None,
            callbacks: Vec::new(),
        }
    }

    fn state(&self, now: Instant, max_age: Duration) -> SubscriptionState {
        if let Some(last_update) = self.last_update {
            if now.saturating_duration_since(last_update) <= max_age {
                return SubscriptionState::Active;
            }
        }
        match (self.last_request, self.last_update) {
            (Some(last_request), Some(last_update)) if last_request > last_update => SubscriptionState::Requested,
            (Some(_), None) => SubscriptionState::Requested,
            (_, Some(_)) => SubscriptionState::Stale,
            (None, None) => SubscriptionState::Registered,
        }
    }

    fn snapshot(&self) -> DataRefSnapshot {
        DataRefSnapshot {
            id: self.id,
            path: self.path.clone(),
            frequency: self.frequency,
            character_position: self.character_slot.as_ref().map(|s| s.position),
            value: self.value,
            initialized: self.initialized,
        }
    }

    fn request(&self) -> DataRefRequest {
        DataRefRequest {
            frequency: self.frequency,
            id: self.id,
            path: self.path.to_string(),
        }
    }

    fn unsubscribe_request(&self) -> DataRefRequest {
        DataRefRequest {
            frequency: 0,
            id: self.id,
            path: self.path.to_string(),
        }
    }
}

struct StringEntry {
    subscription: Arc<StringSubscription>,
    slot_ids: Vec<i32>,
}

#[derive(Default)]
struct RegistryInner {
    subscriptions: FxHashMap<i32, Subscription>,
    strings: Vec<StringEntry>,
}

impl RegistryInner {
    fn remove_string_entry(&mut self, idx: usize) -> Vec<DataRefRequest> {
        let entry = self.strings.remove(idx);
        entry.subscription.reset();
        entry.subscription.clear_callbacks();
        entry.slot_ids.iter()
            .flat_map(|id| self.subscriptions.remove(id))
            .map(|s| s.unsubscribe_request())
            .collect()
    }
}


/// The authoritative set of subscriptions, shared by the caller-facing API, the receive loop
///  and the resubscription scheduler.
///
/// All bookkeeping happens under a single lock, but callbacks are always invoked after the
///  lock was released: they run on the receive loop's task and may well call back into the
///  connector.
#[derive(Default)]
pub struct DataRefRegistry {
    inner: Mutex<RegistryInner>,
}

impl Debug for DataRefRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        write!(f, "DataRefRegistry{{subscriptions:{},strings:{}}}", inner.subscriptions.len(), inner.strings.len())
    }
}

impl DataRefRegistry {
    pub fn new() -> DataRefRegistry {
        Default::default()
    }

    pub fn register_scalar(&self, path: &str, frequency: i32, callback: DataRefCallback) -> anyhow::Result<(i32, SubscriptionHandle)> {
        check_path_and_frequency(path, frequency)?;

        let handle = SubscriptionHandle::next();
        let mut subscription = Subscription::new(path.into(), frequency, None);
        subscription.callbacks.push((handle, callback));
        let id = subscription.id;

        debug!(id, path, frequency, "registering dataref");
        self.inner.lock().subscriptions.insert(id, subscription);
        Ok((id, handle))
    }

    /// Registers a string dataref along with one scalar slot per character, named
    ///  `"{path}[{i}]"`.
    pub fn register_string(&self, path: &str, frequency: i32, buffer_size: usize, age_threshold: Duration, callback: StringCallback) -> anyhow::Result<SubscriptionHandle> {
        check_path_and_frequency(path, frequency)?;

        let string = Arc::new(StringSubscription::new(path.into(), buffer_size, age_threshold)?);
        // the assembler rejected a zero buffer size, and the last slot has the longest path
        DataRefRequest::check_path(&format!("{}[{}]", path, buffer_size - 1))?;

        let handle = SubscriptionHandle::next();
        string.add_callback(handle, callback);

        let slots = (0..buffer_size)
            .map(|position| {
                let slot = CharacterSlot { position, string: string.clone() };
                Subscription::new(format!("{}[{}]", path, position).into(), frequency, Some(slot))
            })
            .collect::<Vec<_>>();

        debug!(path, frequency, buffer_size, "registering string dataref");

        let mut inner = self.inner.lock();
        let slot_ids = slots.iter().map(|s| s.id).collect();
        for slot in slots {
            inner.subscriptions.insert(slot.id, slot);
        }
        inner.strings.push(StringEntry {
            subscription: string,
            slot_ids,
        });
        Ok(handle)
    }

    /// Removes subscriptions, returning the zero-frequency requests that tell the simulator
    ///  to stop streaming them.
    ///
    /// Without a handle, every scalar and string subscription for `path` is removed. With a
    ///  handle, only the subscription that handle belongs to is removed.
    pub fn unregister(&self, path: &str, handle: Option<SubscriptionHandle>) -> anyhow::Result<Vec<DataRefRequest>> {
        let mut inner = self.inner.lock();

        let result: Vec<DataRefRequest> = match handle {
            Some(handle) => {
                let scalar_id = inner.subscriptions.values()
                    .find(|s| &*s.path == path && s.callbacks.iter().any(|(h, _)| *h == handle))
                    .map(|s| s.id);
                if let Some(id) = scalar_id {
                    inner.subscriptions.remove(&id)
                        .map(|s| s.unsubscribe_request())
                        .into_iter()
                        .collect()
                }
                else if let Some(idx) = inner.strings.iter()
                    .position(|e| &**e.subscription.path() == path && e.subscription.has_callback(handle))
                {
                    inner.remove_string_entry(idx)
                }
                else {
                    Vec::new()
                }
            }
            None => {
                let scalar_ids = inner.subscriptions.values()
                    .filter(|s| &*s.path == path)
                    .map(|s| s.id)
                    .collect::<Vec<_>>();
                let mut result = scalar_ids.iter()
                    .flat_map(|id| inner.subscriptions.remove(id))
                    .map(|s| s.unsubscribe_request())
                    .collect::<Vec<_>>();

                while let Some(idx) = inner.strings.iter().position(|e| &**e.subscription.path() == path) {
                    result.extend(inner.remove_string_entry(idx));
                }
                result
            }
        };

        if result.is_empty() {
            return Err(XPlaneError::NoSuchSubscription(path.to_string()).into());
        }
        debug!(path, ?handle, num_removed = result.len(), "unregistered dataref");
        Ok(result)
    }

    /// Removes everything, returning the zero-frequency requests for all removed ids
    pub fn unregister_all(&self) -> Vec<DataRefRequest> {
        let mut inner = self.inner.lock();
        for entry in inner.strings.drain(..) {
            entry.subscription.reset();
            entry.subscription.clear_callbacks();
        }
        let mut result = inner.subscriptions.drain()
            .map(|(_, s)| s.unsubscribe_request())
            .collect::<Vec<_>>();
        result.sort_by_key(|r| r.id);
        result
    }

    /// Records a received value and notifies subscribers. Scalar subscribers are notified
    ///  only when the value changed, while character slots forward every update to their
    ///  string so that it can count toward completing a fill cycle.
    ///
    /// Returns a snapshot of the subscription as of this update.
    pub fn update(&self, id: i32, value: f32) -> anyhow::Result<DataRefSnapshot> {
        let (snapshot, callbacks, character_slot) = {
            let mut inner = self.inner.lock();
            let Some(subscription) = inner.subscriptions.get_mut(&id) else {
                return Err(XPlaneError::UnknownDataRef(id).into());
            };

            subscription.last_update = Some(Instant::now());

            let is_changed = !subscription.initialized || subscription.value != value;
            let notify = is_changed || subscription.character_slot.is_some();
            if is_changed {
                subscription.value = value;
                subscription.initialized = true;
            }

            let callbacks = if notify {
                subscription.callbacks.iter()
                    .map(|(_, cb)| cb.clone())
                    .collect()
            }
            else {
                Vec::new()
            };
            let character_slot = if notify { subscription.character_slot.clone() } else { None };
            (subscription.snapshot(), callbacks, character_slot)
        };

        trace!(id, value, num_callbacks = callbacks.len(), "updated dataref");
        for callback in callbacks {
            callback(&snapshot);
        }
        if let Some(slot) = character_slot {
            slot.string.on_character(slot.position, value)?;
        }
        Ok(snapshot)
    }

    /// Calls `f` with a request for every subscription that is not active, and marks those
    ///  subscriptions as requested. Requests are produced in id order. `f` is called after
    ///  the lock was released.
    pub fn for_each_stale(&self, max_age: Duration, mut f: impl FnMut(DataRefRequest)) {
        let now = Instant::now();
        let mut requests = {
            let mut inner = self.inner.lock();
            inner.subscriptions.values_mut()
                .filter(|s| s.state(now, max_age) != SubscriptionState::Active)
                .map(|s| {
                    s.last_request = Some(now);
                    s.request()
                })
                .collect::<Vec<_>>()
        };
        requests.sort_by_key(|r| r.id);

        for request in requests {
            f(request);
        }
    }

    pub fn subscription_state(&self, id: i32, max_age: Duration) -> Option<SubscriptionState> {
        self.inner.lock()
            .subscriptions.get(&id)
            .map(|s| s.state(Instant::now(), max_age))
    }

    pub fn snapshot(&self, id: i32) -> Option<DataRefSnapshot> {
        self.inner.lock()
            .subscriptions.get(&id)
            .map(|s| s.snapshot())
    }

    /// All registered subscriptions, including character slots, ordered by id
    pub fn snapshots(&self) -> Vec<DataRefSnapshot> {
        let mut result = self.inner.lock()
            .subscriptions.values()
            .map(|s| s.snapshot())
            .collect::<Vec<_>>();
        result.sort_by_key(|s| s.id);
        result
    }

    pub fn ids_for_path(&self, path: &str) -> Vec<i32> {
        let mut result = self.inner.lock()
            .subscriptions.values()
            .filter(|s| &*s.path == path)
            .map(|s| s.id)
            .collect::<Vec<_>>();
        result.sort();
        result
    }

    pub fn contains(&self, id: i32) -> bool {
        self.inner.lock().subscriptions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_path_and_frequency(path: &str, frequency: i32) -> anyhow::Result<()> {
    DataRefRequest::check_path(path)?;
    if frequency <= 0 {
        return Err(XPlaneError::invalid_argument(format!("frequency must be positive, was {}", frequency)).into());
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use bytes::BytesMut;
    use rstest::rstest;
    use tokio::time;
    use crate::connector::string_reassembly::{StringSnapshot, MAX_STRING_BUFFER_SIZE};
    use super::*;

    const MAX_AGE: Duration = Duration::from_secs(5);

    fn counting_callback() -> (Arc<AtomicUsize>, DataRefCallback) {
        let counter = Arc::new(AtomicUsize::new(0));
        let c2 = counter.clone();
        (counter, Arc::new(move |_: &DataRefSnapshot| { c2.fetch_add(1, Ordering::SeqCst); }))
    }

    fn noop() -> DataRefCallback {
        Arc::new(|_: &DataRefSnapshot| {})
    }

    fn collect_stale(registry: &DataRefRegistry) -> Vec<DataRefRequest> {
        let mut result = Vec::new();
        registry.for_each_stale(MAX_AGE, |r| result.push(r));
        result
    }

    #[test]
    fn test_allocate_id_is_unique() {
        let a = allocate_id();
        let b = allocate_id();
        assert!(b > a);
    }

    #[rstest]
    #[case::empty_path("".to_string(), 1)]
    #[case::zero_byte("sim/a\0b".to_string(), 1)]
    #[case::too_long_for_frame("x".repeat(400), 1)]
    #[case::zero_frequency("sim/x".to_string(), 0)]
    #[case::negative_frequency("sim/x".to_string(), -5)]
    fn test_register_invalid(#[case] path: String, #[case] frequency: i32) {
        let registry = DataRefRegistry::new();
        let err = registry.register_scalar(&path, frequency, noop()).unwrap_err();
        assert!(matches!(err.downcast_ref::<XPlaneError>(), Some(XPlaneError::InvalidArgument(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_longest_path() {
        let registry = DataRefRegistry::new();
        let path = "x".repeat(DataRefRequest::MAX_PATH_LEN);
        let (id, _) = registry.register_scalar(&path, 1, noop()).unwrap();

        let requests = collect_stale(&registry);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, id);
        assert!(requests[0].ser(&mut BytesMut::new()).is_ok());
    }

    #[test]
    fn test_register_scalar_initial_snapshot() {
        let registry = DataRefRegistry::new();
        let (id, _) = registry.register_scalar("sim/cockpit/radios/com1_freq_hz", 5, noop()).unwrap();

        let snapshot = registry.snapshot(id).unwrap();
        assert_eq!(&*snapshot.path, "sim/cockpit/radios/com1_freq_hz");
        assert_eq!(snapshot.frequency, 5);
        assert_eq!(snapshot.value, UNINITIALIZED_VALUE);
        assert!(!snapshot.initialized);
        assert_eq!(snapshot.character_position, None);
    }

    #[test]
    fn test_update_fires_on_change_only() {
        let registry = DataRefRegistry::new();
        let (counter, callback) = counting_callback();
        let (id, _) = registry.register_scalar("sim/x", 1, callback).unwrap();

        let snapshot = registry.update(id, 12.5).unwrap();
        assert_eq!(snapshot.value, 12.5);
        assert!(snapshot.initialized);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        registry.update(id, 12.5).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        registry.update(id, 13.0).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_update_with_initial_sentinel_value_fires() {
        let registry = DataRefRegistry::new();
        let (counter, callback) = counting_callback();
        let (id, _) = registry.register_scalar("sim/x", 1, callback).unwrap();

        registry.update(id, UNINITIALIZED_VALUE).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_unknown_id() {
        let registry = DataRefRegistry::new();
        let err = registry.update(-17, 1.0).unwrap_err();
        assert_eq!(err.downcast_ref::<XPlaneError>(), Some(&XPlaneError::UnknownDataRef(-17)));
    }

    #[test]
    fn test_callback_may_reenter_registry() {
        let registry = Arc::new(DataRefRegistry::new());
        let r2 = registry.clone();
        let (id, _) = registry.register_scalar("sim/x", 1, Arc::new(move |s: &DataRefSnapshot| {
            assert!(r2.contains(s.id));
            r2.unregister("sim/x", None).unwrap();
        })).unwrap();

        registry.update(id, 1.0).unwrap();
        assert!(!registry.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle() {
        let registry = DataRefRegistry::new();
        let (id, _) = registry.register_scalar("sim/x", 1, noop()).unwrap();
        assert_eq!(registry.subscription_state(id, MAX_AGE), Some(SubscriptionState::Registered));

        assert_eq!(collect_stale(&registry), vec![DataRefRequest { frequency: 1, id, path: "sim/x".to_string() }]);
        assert_eq!(registry.subscription_state(id, MAX_AGE), Some(SubscriptionState::Requested));

        // no data yet, so it is requested again
        time::advance(Duration::from_secs(1)).await;
        assert_eq!(collect_stale(&registry).len(), 1);

        registry.update(id, 3.0).unwrap();
        assert_eq!(registry.subscription_state(id, MAX_AGE), Some(SubscriptionState::Active));
        assert!(collect_stale(&registry).is_empty());

        time::advance(MAX_AGE).await;
        assert_eq!(registry.subscription_state(id, MAX_AGE), Some(SubscriptionState::Active));
        assert!(collect_stale(&registry).is_empty());

        time::advance(Duration::from_millis(1)).await;
        assert_eq!(registry.subscription_state(id, MAX_AGE), Some(SubscriptionState::Stale));
        assert_eq!(collect_stale(&registry).len(), 1);
        assert_eq!(registry.subscription_state(id, MAX_AGE), Some(SubscriptionState::Requested));

        registry.update(id, 3.0).unwrap();
        assert_eq!(registry.subscription_state(id, MAX_AGE), Some(SubscriptionState::Active));
    }

    #[test]
    fn test_for_each_stale_in_id_order() {
        let registry = DataRefRegistry::new();
        let ids = (0..10)
            .map(|i| registry.register_scalar(&format!("sim/x{}", i), 1, noop()).unwrap().0)
            .collect::<Vec<_>>();

        let requested = collect_stale(&registry).into_iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(requested, ids);
    }

    #[test]
    fn test_unregister_by_path() {
        let registry = DataRefRegistry::new();
        let (a, _) = registry.register_scalar("sim/x", 1, noop()).unwrap();
        let (b, _) = registry.register_scalar("sim/x", 2, noop()).unwrap();
        let (c, _) = registry.register_scalar("sim/y", 1, noop()).unwrap();

        let mut requests = registry.unregister("sim/x", None).unwrap();
        requests.sort_by_key(|r| r.id);
        assert_eq!(requests, vec![
            DataRefRequest { frequency: 0, id: a, path: "sim/x".to_string() },
            DataRefRequest { frequency: 0, id: b, path: "sim/x".to_string() },
        ]);
        assert!(!registry.contains(a));
        assert!(!registry.contains(b));
        assert!(registry.contains(c));
    }

    #[test]
    fn test_unregister_by_handle() {
        let registry = DataRefRegistry::new();
        let (a, handle_a) = registry.register_scalar("sim/x", 1, noop()).unwrap();
        let (b, handle_b) = registry.register_scalar("sim/x", 1, noop()).unwrap();

        let requests = registry.unregister("sim/x", Some(handle_b)).unwrap();
        assert_eq!(requests, vec![DataRefRequest { frequency: 0, id: b, path: "sim/x".to_string() }]);
        assert!(registry.contains(a));

        // the handle belongs to a different path
        assert!(registry.unregister("sim/y", Some(handle_a)).is_err());
        assert!(registry.contains(a));
    }

    #[rstest]
    #[case::by_path(None)]
    #[case::by_foreign_handle(Some(SubscriptionHandle(u64::MAX)))]
    fn test_unregister_unknown(#[case] handle: Option<SubscriptionHandle>) {
        let registry = DataRefRegistry::new();
        registry.register_scalar("sim/x", 1, noop()).unwrap();

        let err = registry.unregister("sim/y", handle).unwrap_err();
        assert_eq!(err.downcast_ref::<XPlaneError>(), Some(&XPlaneError::NoSuchSubscription("sim/y".to_string())));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_all() {
        let registry = DataRefRegistry::new();
        registry.register_scalar("sim/x", 1, noop()).unwrap();
        registry.register_string("sim/s", 1, 3, MAX_AGE, Arc::new(|_: &StringSnapshot| {})).unwrap();
        assert_eq!(registry.len(), 4);

        let requests = registry.unregister_all();
        assert_eq!(requests.len(), 4);
        assert!(requests.iter().all(|r| r.frequency == 0));
        assert!(registry.is_empty());
        assert!(registry.unregister_all().is_empty());
    }

    #[test]
    fn test_register_string_creates_slots() {
        let registry = DataRefRegistry::new();
        registry.register_string("sim/aircraft/view/acf_tailnum", 2, 4, MAX_AGE, Arc::new(|_: &StringSnapshot| {})).unwrap();

        let snapshots = registry.snapshots();
        assert_eq!(snapshots.len(), 4);
        for (i, s) in snapshots.iter().enumerate() {
            assert_eq!(&*s.path, format!("sim/aircraft/view/acf_tailnum[{}]", i));
            assert_eq!(s.character_position, Some(i));
            assert_eq!(s.frequency, 2);
        }
    }

    #[rstest]
    #[case::zero_buffer("sim/s".to_string(), 0)]
    #[case::huge_buffer("sim/s".to_string(), usize::MAX)]
    #[case::above_max_buffer("sim/s".to_string(), MAX_STRING_BUFFER_SIZE + 1)]
    #[case::zero_byte("sim/a\0b".to_string(), 4)]
    #[case::slot_path_too_long("x".repeat(397), 10)]
    #[case::two_digit_slot_too_long("x".repeat(396), 11)]
    fn test_register_string_invalid(#[case] path: String, #[case] buffer_size: usize) {
        let registry = DataRefRegistry::new();
        let err = registry.register_string(&path, 1, buffer_size, MAX_AGE, Arc::new(|_: &StringSnapshot| {})).unwrap_err();
        assert!(matches!(err.downcast_ref::<XPlaneError>(), Some(XPlaneError::InvalidArgument(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_string_longest_slot_path() {
        let registry = DataRefRegistry::new();
        registry.register_string(&"x".repeat(396), 1, 10, MAX_AGE, Arc::new(|_: &StringSnapshot| {})).unwrap();
        assert_eq!(registry.len(), 10);

        for request in collect_stale(&registry) {
            assert!(request.ser(&mut BytesMut::new()).is_ok(), "{}", request.path);
        }
    }

    #[test]
    fn test_string_reassembly_through_slots() {
        let registry = DataRefRegistry::new();
        let values = Arc::new(Mutex::new(Vec::new()));
        let v2 = values.clone();
        registry.register_string("sim/s", 1, 3, MAX_AGE, Arc::new(move |s: &StringSnapshot| v2.lock().push(s.value.clone()))).unwrap();

        let ids = registry.snapshots().iter().map(|s| s.id).collect::<Vec<_>>();
        // repeated identical values still count toward the fill cycle
        for _ in 0..2 {
            registry.update(ids[2], 0.0).unwrap();
            registry.update(ids[0], 65.0).unwrap();
            registry.update(ids[1], 66.0).unwrap();
        }
        assert_eq!(*values.lock(), vec!["AB".to_string()]);
    }

    #[test]
    fn test_unregister_string() {
        let registry = DataRefRegistry::new();
        let (scalar_id, _) = registry.register_scalar("sim/s[0]", 1, noop()).unwrap();
        let handle = registry.register_string("sim/s", 1, 2, MAX_AGE, Arc::new(|_: &StringSnapshot| {})).unwrap();

        let requests = registry.unregister("sim/s", Some(handle)).unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.frequency == 0 && r.path.starts_with("sim/s[")));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(scalar_id));

        assert!(registry.unregister("sim/s", Some(handle)).is_err());
    }
}
