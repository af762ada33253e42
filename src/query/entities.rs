//! Entity façades: profile, offers, applications, feed, messages.

use talentgrid_types::{Application, FeedPost, JobOffer, Message, Profile, tables};
use uuid::Uuid;

use crate::backend::{Filter, RangeQuery};
use crate::cache::{CacheKey, EntityKind};
use crate::ranking::{RankedItem, ViewerContext, rank};
use crate::realtime::{ChangeEvent, EventFilter, RowFilter, SubscriptionSpec, value_text};

use super::cached::CachedQuery;
use super::spec::{Identified, QueryPolicy, QuerySpec};
use super::QueryDefaults;

const CREATED_AT: &str = "created_at";

impl Identified for Profile {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Identified for JobOffer {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Identified for Application {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Identified for FeedPost {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Identified for Message {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// One user's profile. Refreshed on updates to that row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileQuery {
    pub user_id: Uuid,
}

impl ProfileQuery {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }
}

impl QuerySpec for ProfileQuery {
    type Item = Profile;

    fn entity(&self) -> EntityKind {
        EntityKind::Profile
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(EntityKind::Profile, self.user_id)
    }

    fn range(&self, offset: usize, limit: usize) -> RangeQuery {
        RangeQuery::new(tables::PROFILES)
            .filter(Filter::eq("id", self.user_id.to_string()))
            .range(offset, limit)
    }

    fn single_row(&self) -> Option<(&'static str, Uuid)> {
        Some((tables::PROFILES, self.user_id))
    }

    fn subscriptions(&self) -> Vec<SubscriptionSpec> {
        vec![
            SubscriptionSpec::new(tables::PROFILES, EventFilter::Update)
                .with_filter(RowFilter::eq("id", self.user_id)),
        ]
    }

    fn policy(&self, defaults: &QueryDefaults) -> QueryPolicy {
        QueryPolicy {
            ttl: defaults.cache.profile_ttl,
            page_size: 1,
            paginated: false,
            background_refetch: false,
        }
    }
}

impl CachedQuery<ProfileQuery> {
    pub fn profile(&self) -> Option<&Profile> {
        self.data().first()
    }
}

/// Offers published by one recruiter, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffersQuery {
    pub recruiter_id: Uuid,
    pub active_only: bool,
    /// Page size; falls back to the configured default.
    pub limit: Option<usize>,
}

impl OffersQuery {
    pub fn new(recruiter_id: Uuid) -> Self {
        Self {
            recruiter_id,
            active_only: false,
            limit: None,
        }
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.max(1));
        self
    }
}

impl QuerySpec for OffersQuery {
    type Item = JobOffer;

    fn entity(&self) -> EntityKind {
        EntityKind::Offers
    }

    /// `offers_<recruiter>_<active>_<limit>`; an unset limit renders as
    /// `default`.
    fn cache_key(&self) -> CacheKey {
        let key = CacheKey::new(EntityKind::Offers, self.recruiter_id)
            .with_qualifier(self.active_only);
        match self.limit {
            Some(limit) => key.with_qualifier(limit),
            None => key.with_qualifier("default"),
        }
    }

    fn range(&self, offset: usize, limit: usize) -> RangeQuery {
        let mut query = RangeQuery::new(tables::JOB_OFFERS)
            .filter(Filter::eq("recruiter_id", self.recruiter_id.to_string()));
        if self.active_only {
            query = query.filter(Filter::eq("is_active", true));
        }
        query.order_by(CREATED_AT, true).range(offset, limit)
    }

    fn subscriptions(&self) -> Vec<SubscriptionSpec> {
        vec![
            SubscriptionSpec::new(tables::JOB_OFFERS, EventFilter::Any)
                .with_filter(RowFilter::eq("recruiter_id", self.recruiter_id)),
        ]
    }

    fn policy(&self, defaults: &QueryDefaults) -> QueryPolicy {
        QueryPolicy {
            ttl: defaults.cache.offers_ttl,
            page_size: self.limit.unwrap_or(defaults.page_size),
            paginated: true,
            background_refetch: false,
        }
    }
}

/// Applications submitted by one candidate, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationsQuery {
    pub candidate_id: Uuid,
}

impl ApplicationsQuery {
    pub fn new(candidate_id: Uuid) -> Self {
        Self { candidate_id }
    }
}

impl QuerySpec for ApplicationsQuery {
    type Item = Application;

    fn entity(&self) -> EntityKind {
        EntityKind::Applications
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(EntityKind::Applications, self.candidate_id)
    }

    fn range(&self, offset: usize, limit: usize) -> RangeQuery {
        RangeQuery::new(tables::APPLICATIONS)
            .filter(Filter::eq("candidate_id", self.candidate_id.to_string()))
            .order_by(CREATED_AT, true)
            .range(offset, limit)
    }

    fn subscriptions(&self) -> Vec<SubscriptionSpec> {
        vec![
            SubscriptionSpec::new(tables::APPLICATIONS, EventFilter::Any)
                .with_filter(RowFilter::eq("candidate_id", self.candidate_id)),
        ]
    }

    fn policy(&self, defaults: &QueryDefaults) -> QueryPolicy {
        QueryPolicy {
            ttl: defaults.cache.default_ttl,
            page_size: defaults.page_size,
            paginated: true,
            background_refetch: false,
        }
    }
}

/// The feed as seen by one viewer. Stored newest first; ranking is applied
/// on read so appended pages never reorder what is already shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub viewer_id: Uuid,
    pub page_size: Option<usize>,
}

impl FeedQuery {
    pub fn new(viewer_id: Uuid) -> Self {
        Self {
            viewer_id,
            page_size: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }
}

impl QuerySpec for FeedQuery {
    type Item = FeedPost;

    fn entity(&self) -> EntityKind {
        EntityKind::Feed
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(EntityKind::Feed, self.viewer_id)
    }

    fn range(&self, offset: usize, limit: usize) -> RangeQuery {
        RangeQuery::new(tables::FEED_POSTS)
            .order_by(CREATED_AT, true)
            .range(offset, limit)
    }

    fn subscriptions(&self) -> Vec<SubscriptionSpec> {
        vec![SubscriptionSpec::new(tables::FEED_POSTS, EventFilter::Any)]
    }

    fn policy(&self, defaults: &QueryDefaults) -> QueryPolicy {
        QueryPolicy {
            ttl: defaults.cache.default_ttl,
            page_size: self.page_size.unwrap_or(defaults.feed_page_size),
            paginated: true,
            background_refetch: true,
        }
    }
}

impl CachedQuery<FeedQuery> {
    /// Loaded posts ordered by relevance for `viewer`.
    pub fn ranked(&self, viewer: &ViewerContext) -> Vec<RankedItem<FeedPost>> {
        rank(self.data().to_vec(), viewer)
    }
}

/// The conversation between two users, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesQuery {
    pub user_id: Uuid,
    pub peer_id: Uuid,
}

impl MessagesQuery {
    pub fn new(user_id: Uuid, peer_id: Uuid) -> Self {
        Self { user_id, peer_id }
    }

    pub fn with_peer(self, peer_id: Uuid) -> Self {
        Self { peer_id, ..self }
    }

    /// Both orderings of the pair share one key.
    fn ordered_pair(&self) -> (Uuid, Uuid) {
        if self.user_id <= self.peer_id {
            (self.user_id, self.peer_id)
        } else {
            (self.peer_id, self.user_id)
        }
    }

    fn direction(sender: Uuid, receiver: Uuid) -> Filter {
        Filter::And(vec![
            Filter::eq("sender_id", sender.to_string()),
            Filter::eq("receiver_id", receiver.to_string()),
        ])
    }
}

impl QuerySpec for MessagesQuery {
    type Item = Message;

    fn entity(&self) -> EntityKind {
        EntityKind::Messages
    }

    fn cache_key(&self) -> CacheKey {
        let (low, high) = self.ordered_pair();
        CacheKey::new(EntityKind::Messages, low).with_qualifier(high)
    }

    fn range(&self, offset: usize, limit: usize) -> RangeQuery {
        RangeQuery::new(tables::MESSAGES)
            .filter(Filter::Or(vec![
                Self::direction(self.user_id, self.peer_id),
                Self::direction(self.peer_id, self.user_id),
            ]))
            .order_by(CREATED_AT, true)
            .range(offset, limit)
    }

    /// Anything this user sends or receives. `accepts` narrows delivery to
    /// the pair; a conversation with oneself needs only one feed.
    fn subscriptions(&self) -> Vec<SubscriptionSpec> {
        let received = SubscriptionSpec::new(tables::MESSAGES, EventFilter::Insert)
            .with_filter(RowFilter::eq("receiver_id", self.user_id));
        if self.user_id == self.peer_id {
            return vec![received];
        }
        vec![
            received,
            SubscriptionSpec::new(tables::MESSAGES, EventFilter::Insert)
                .with_filter(RowFilter::eq("sender_id", self.user_id)),
        ]
    }

    fn accepts(&self, event: &ChangeEvent) -> bool {
        let Some(row) = event.row() else {
            return false;
        };
        let party = |column: &str| row.get(column).map(value_text);
        let (user, peer) = (self.user_id.to_string(), self.peer_id.to_string());
        match (party("sender_id"), party("receiver_id")) {
            (Some(sender), Some(receiver)) => {
                (sender == user && receiver == peer) || (sender == peer && receiver == user)
            }
            _ => false,
        }
    }

    fn policy(&self, defaults: &QueryDefaults) -> QueryPolicy {
        QueryPolicy {
            ttl: defaults.cache.default_ttl,
            page_size: defaults.messages_page_size,
            paginated: true,
            background_refetch: false,
        }
    }
}
