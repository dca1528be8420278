//! Event vocabulary shared with the broker.
//!
//! Every request/response call and every push the client depends on is named
//! here.  The names are the contract; the wire encoding around them is the
//! broker's JSON framing (see [`crate::chatmesh::transport`]).

/// Reserved event name used to correlate request/response frames.
pub const ACK: &str = "ack";

// Client -> server, request/response via `call`.
pub const SEND_MESSAGE: &str = "send_message";
pub const SEND_COMMAND: &str = "send_command";
pub const SEND_NOTIFICATION_TO_CHAT: &str = "send_notification_to_chat";
pub const CREATE_CHAT: &str = "create_chat";
pub const JOIN_CHAT: &str = "join_chat";
pub const EXIT_CHAT: &str = "exit_chat";
pub const DELETE_CHAT: &str = "delete_chat";
pub const PULL_MEMBERS_INTO_CHAT: &str = "pull_members_into_chat";
pub const REMOVE_MEMBER_FROM_CHAT: &str = "remove_member_from_chat";
pub const GET_JOINED_CHATS: &str = "get_joined_chats";
pub const GET_CREATED_CHATS: &str = "get_created_chats";
pub const GET_CHAT: &str = "get_chat";
pub const GET_CHAT_MEMBERS: &str = "get_chat_members";
pub const GET_MEMBER: &str = "get_member";
pub const GET_MEMBERS: &str = "get_members";
pub const GET_MEMBER_BY_NAME: &str = "get_member_by_name";
pub const GET_ONLINE_MEMBERS: &str = "get_online_members";
pub const GET_CHAT_ONLINE_MEMBERS: &str = "get_chat_online_members";
pub const LOAD_CHAT_MESSAGES_FROM_SERVER: &str = "load_chat_messages_from_server";
pub const LISTEN_IN_CHAT: &str = "listen_in_chat";
pub const UNLISTEN_IN_CHAT: &str = "unlisten_in_chat";
pub const GET_LISTEN_IN_CHATS: &str = "get_listen_in_chats";
pub const REGISTER_CHAT_MANAGER: &str = "register_chat_manager";

// Server -> client pushes, dispatched to registered handlers.
pub const RECEIVE_LOGIN_RESPONSE: &str = "receive_login_response";
pub const DISCONNECT: &str = "disconnect";
pub const RECEIVE_MESSAGE: &str = "receive_message";
pub const RECEIVE_COMMAND: &str = "receive_command";
pub const NEXT_SPEAKER: &str = "next_speaker";
pub const RECEIVE_NOTIFICATION_FROM_CHAT: &str = "receive_notification_from_chat";
