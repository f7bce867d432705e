//! Protocol constants shared by clients and servers

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::OnceLock;

pub const PROFILE_VERSION: &str = "1.3";

pub const STATUS_OK: &str = "samp.ok";
pub const STATUS_WARNING: &str = "samp.warning";
pub const STATUS_ERROR: &str = "samp.error";

pub const HUB_PING: &str = "samp.hub.ping";
pub const HUB_SET_XMLRPC_CALLBACK: &str = "samp.hub.setXmlrpcCallback";
pub const HUB_REGISTER: &str = "samp.hub.register";
pub const HUB_UNREGISTER: &str = "samp.hub.unregister";
pub const HUB_DECLARE_METADATA: &str = "samp.hub.declareMetadata";
pub const HUB_GET_METADATA: &str = "samp.hub.getMetadata";
pub const HUB_DECLARE_SUBSCRIPTIONS: &str = "samp.hub.declareSubscriptions";
pub const HUB_GET_SUBSCRIPTIONS: &str = "samp.hub.getSubscriptions";
pub const HUB_GET_REGISTERED_CLIENTS: &str = "samp.hub.getRegisteredClients";
pub const HUB_GET_SUBSCRIBED_CLIENTS: &str = "samp.hub.getSubscribedClients";
pub const HUB_NOTIFY: &str = "samp.hub.notify";
pub const HUB_NOTIFY_ALL: &str = "samp.hub.notifyAll";
pub const HUB_CALL: &str = "samp.hub.call";
pub const HUB_CALL_ALL: &str = "samp.hub.callAll";
pub const HUB_CALL_AND_WAIT: &str = "samp.hub.callAndWait";
pub const HUB_REPLY: &str = "samp.hub.reply";

/// Standard profile method prefix
pub const HUB_PREFIX: &str = "samp.hub.";
/// Web profile method prefix
pub const WEBHUB_PREFIX: &str = "samp.webhub.";
pub const WEBHUB_REGISTER: &str = "samp.webhub.register";
pub const WEBHUB_UNREGISTER: &str = "samp.webhub.unregister";

/// Delivery methods whose payload receives caller provenance
pub const DELIVERY_METHODS: [&str; 5] = [
    HUB_NOTIFY,
    HUB_NOTIFY_ALL,
    HUB_CALL,
    HUB_CALL_ALL,
    HUB_CALL_AND_WAIT,
];

/// Lock-file / hub descriptor keys
pub const KEY_SECRET: &str = "samp.secret";
pub const KEY_XMLRPC_URL: &str = "samp.hub.xmlrpc.url";
pub const KEY_PROFILE_VERSION: &str = "samp.profile.version";

/// Registration result keys
pub const KEY_PRIVATE_KEY: &str = "samp.private-key";
pub const KEY_SELF_ID: &str = "samp.self-id";
pub const KEY_HUB_ID: &str = "samp.hub-id";

pub const ICON_PATH: &str = "/samp/icon";
pub const ICON_CONTENT_TYPE: &str = "image/png";

const ICON_BASE64: &str = concat!(
    "iVBORw0KGgoAAAANSUhEUgAAABAAAAAQCAMAAAAoLQ9TAAAABGdBTUEAALGPC/xhBQAAACBjSFJN",
    "AAB6JgAAgIQAAPoAAACA6AAAdTAAAOpgAAA6mAAAF3CculE8AAAC2VBMVEX/gQD/hQD/hAD/kwD/",
    "egD+ggD9eQD9eAD/jwD/mgD9aQD/iAH+gQL/jQD+dQD9bwD9LgD+MwD7AAD9LgT8JQD9KQn+PQD8",
    "MRD8GwX+LgD+LQD9JAD5AAD9EwD9IgD9IQD9JQD/gwD/iQD/mAD/lwD/lwD/kAD/mgj/pBf+fgD+",
    "hQL+gAD+jgD+jwD+kQH+kQD+qzr/hwD+jQD+kAD+hwD+fQH/hQD/iQP/hgD/hQD/jAr/qk7+zpf+",
    "slv/hgD+hQL+ewH+fQH+gAL+dgD+dgD+ggn+gAb+dAH+bwD////+vH/+gAX+cwD+dQL+olL+/vv+",
    "2rv+9Ov9fhb+dgX+bQL+u4r+x6L+9/D+sHn+bwf+bRL9WAD+jUv+y67+17/+ZAX+XAX+28j+ya7+",
    "uJj+4M/+WgP9TAD++fX+iVj+0L/+ybD+Uwj9QgD++vj+f1L+VSD9OAD+VBT+PgL+4dj+q5X+UiD+",
    "0sX+OwD+QA/+kHf++vf9Mwv+2tD+0MX9LQD+PQf9JwD+4t3+08f9IQf9hWz+tKj+qpz9aUv9IQD9",
    "JAH9LwP9LQL8Mwz8GAD+5OD++PX9XEf8BQD8EAH8DQD8IAL8JgX9LAP9IgT9MhD8DAD9GQr9RTT9",
    "HAb9GwX9GwP9JwH9JwT8AAD8AAD8CQj+7+79bWT8AAD9JBf9HAD9IwD+kQD+jwv/iQH/iwj+1Kz+",
    "dAD9bQD+6dX+/fn+2LT+fxr+exn9cQD9ZAD////+jkD+lk7+5dT+9e3+dRv9XwD+kE79VwD+mlf+",
    "j0f9XAD+49T+xqL9SQD9VgD9TwD9QwD+0rv+z7b+wqH+4ND9QgD9TgD+UgT+Xxj++Pb+y7T+/Pv+",
    "u5z9NQD9QQD+Sgb+VBT+YTD+eEn+zrz+uJz9Qgr+glf9NAD9JAD+2s/+18n9NAL9IgD+6uH9NgD+",
    "RCD+6+X/+/r+zsH+OxL9Kwb9Iwf9Nh/8EgD+mpH8DgCOXzztAAAAqnRSTlMAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAACARZVgIhsKgEBAxiU7v7++qoaAQNI7f79+/v8/eEfA1D9/vr9",
    "/v7+/vi2JfH8/v7+/UOo+v7+/Igt9v7+/Kh0/P7+/KCg/P7+/HSo/P7+9i2I/P7++qhD/f7+/vzx",
    "Jbb4/v7+/v36/v1QAx/h/fz7+/3+7UgDARqq+/7ulRgDAQEqbZODVRYBAgcNDmUAAAABYktHREmH",
    "BeR8AAABG0lEQVQY0wEQAe/+AAABAiEiAyMkJSYnKAQpKgUABgcrCCwtLqovMKsxMjMJNAAKNQs2",
    "N6w4OTo7PD2tPj8BAEAMQUJDREVGR0iuSUqvSw0ADkxNsE6xT7KztLVQUVK2UwAPVLdVuFa5uru8",
    "vbdXWL5ZAFpbv0lcwMHCw8TFxl1ex18AYMhhYsnKuLjLzM3OY2TPZQBm0Gdo0dLTuNS41dZpatdr",
    "AGzYbW7ZuNrb3N3eb0nfcHEAcuBzdOHi4+Tl5XXmdud3EAB44Xl6e+jp6ut8uH3sfn8RABKA7YGC",
    "7oOEhYaHiImKE4sAFIyN746PkJGSk/CUlRWWFgCXF5iZmvFJm/KcnZ4YnxkaABugoRyio6Slpqcd",
    "qKkeHyCF2XqFLvdwRQAAACV0RVh0ZGF0ZTpjcmVhdGUAMjAxMy0xMi0xNlQxMToxNzo0NSswMTow",
    "MIvg1+0AAAAldEVYdGRhdGU6bW9kaWZ5ADIwMTMtMTItMTFUMjA6MzY6MzUrMDE6MDAb2LCcAAAA",
    "AElFTkSuQmCC",);

static ICON: OnceLock<Vec<u8>> = OnceLock::new();

/// The hub icon as PNG bytes, decoded once on first use
pub fn icon() -> &'static [u8] {
    ICON.get_or_init(|| STANDARD.decode(ICON_BASE64).unwrap_or_default())
}
