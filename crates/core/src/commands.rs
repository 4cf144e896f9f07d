//! Well-known host command and method names.
//!
//! Inbound event commands are pushed by host listeners; outbound methods are
//! host service entry points. The bridge only needs the ones it taps.

/// Channel prefix of the host's own logging service.
pub const LOGGER_CHANNEL_PREFIX: &str = "ns-LoggerApi";

/// Inbound event commands.
pub mod receive {
    pub const RECENT_CONTACT: &str = "nodeIKernelRecentContactListener/onRecentContactListChangedVer2";
    pub const UPDATE_MSG: &str = "nodeIKernelMsgListener/onMsgInfoListUpdate";
    pub const UPDATE_ACTIVE_MSG: &str = "nodeIKernelMsgListener/onActiveMsgInfoUpdate";
    pub const NEW_MSG: &str = "nodeIKernelMsgListener/onRecvMsg";
    pub const NEW_ACTIVE_MSG: &str = "nodeIKernelMsgListener/onRecvActiveMsg";
    pub const SELF_SEND_MSG: &str = "nodeIKernelMsgListener/onAddSendMsg";
    pub const GROUPS: &str = "nodeIKernelGroupListener/onGroupListUpdate";
    pub const GROUP_MEMBER_LIST: &str = "nodeIKernelGroupListener/onMemberListChange";
    pub const GROUP_MEMBER_INFO_UPDATE: &str = "nodeIKernelGroupListener/onMemberInfoChange";
    pub const FRIENDS: &str = "onBuddyListChange";
    pub const SELF_STATUS: &str = "nodeIKernelProfileListener/onSelfStatusChanged";
}

/// Outbound host methods.
pub mod method {
    pub const GET_GROUP_LIST: &str = "nodeIKernelGroupService/getGroupList";
    pub const GET_MEMBER_INFO: &str = "nodeIKernelGroupService/getMemberInfo";
    pub const ACTIVATE_CHAT: &str = "nodeIKernelMsgService/getAioFirstViewLatestMsgsAndAddActiveChat";
    pub const DELETE_ACTIVE_CHAT: &str = "nodeIKernelMsgService/deleteActiveChatByUid";
}
