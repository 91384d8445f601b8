//! Request descriptor handed to every admission handler.
//!
//! Everything except the proposed object is fixed at construction. Mutating
//! handlers receive `&mut Attributes` and may only reach the object through
//! [`Attributes::object_mut`]; validating handlers receive `&Attributes`.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{GroupVersionKind, GroupVersionResource, Operation, RequestId, UserInfo};

#[derive(Clone, Debug)]
pub struct Attributes {
    uid: RequestId,
    operation: Operation,
    resource: GroupVersionResource,
    kind: GroupVersionKind,
    subresource: String,
    namespace: String,
    name: String,
    object: Option<Value>,
    old_object: Option<Value>,
    user: UserInfo,
    dry_run: bool,
    cancellation: CancellationToken,
}

impl Attributes {
    pub fn builder(operation: Operation, resource: GroupVersionResource) -> AttributesBuilder {
        AttributesBuilder::new(operation, resource)
    }

    pub fn uid(&self) -> &RequestId {
        &self.uid
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn resource(&self) -> &GroupVersionResource {
        &self.resource
    }

    pub fn kind(&self) -> &GroupVersionKind {
        &self.kind
    }

    /// Empty when the request targets the main resource.
    pub fn subresource(&self) -> &str {
        &self.subresource
    }

    /// Empty for cluster-scoped resources.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object(&self) -> Option<&Value> {
        self.object.as_ref()
    }

    pub fn object_mut(&mut self) -> Option<&mut Value> {
        self.object.as_mut()
    }

    pub fn old_object(&self) -> Option<&Value> {
        self.old_object.as_ref()
    }

    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn into_object(self) -> Option<Value> {
        self.object
    }
}

#[derive(Clone, Debug)]
pub struct AttributesBuilder {
    inner: Attributes,
}

impl AttributesBuilder {
    pub fn new(operation: Operation, resource: GroupVersionResource) -> Self {
        Self {
            inner: Attributes {
                uid: RequestId::new(),
                operation,
                resource,
                kind: GroupVersionKind::default(),
                subresource: String::new(),
                namespace: String::new(),
                name: String::new(),
                object: None,
                old_object: None,
                user: UserInfo::default(),
                dry_run: false,
                cancellation: CancellationToken::new(),
            },
        }
    }

    pub fn uid(mut self, uid: RequestId) -> Self {
        self.inner.uid = uid;
        self
    }

    pub fn kind(mut self, kind: GroupVersionKind) -> Self {
        self.inner.kind = kind;
        self
    }

    pub fn subresource(mut self, subresource: impl Into<String>) -> Self {
        self.inner.subresource = subresource.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.inner.namespace = namespace.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner.name = name.into();
        self
    }

    pub fn object(mut self, object: Value) -> Self {
        self.inner.object = Some(object);
        self
    }

    pub fn old_object(mut self, old_object: Value) -> Self {
        self.inner.old_object = Some(old_object);
        self
    }

    pub fn user(mut self, user: UserInfo) -> Self {
        self.inner.user = user;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.inner.dry_run = dry_run;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.inner.cancellation = token;
        self
    }

    pub fn build(self) -> Attributes {
        self.inner
    }
}
