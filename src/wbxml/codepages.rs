//! ActiveSync WBXML code pages
//!
//! Each page is a table of tag names. Tokens start at 0x05; an empty string marks
//! a token the protocol leaves unassigned.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// First token value assigned to a tag on every page
pub const FIRST_TAG_TOKEN: u8 = 0x05;

/// ActiveSync code pages, numbered as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Page {
    AirSync = 0,
    Contacts = 1,
    Email = 2,
    AirNotify = 3,
    Calendar = 4,
    Move = 5,
    GetItemEstimate = 6,
    FolderHierarchy = 7,
    MeetingResponse = 8,
    Tasks = 9,
    ResolveRecipients = 10,
    ValidateCert = 11,
    Contacts2 = 12,
    Ping = 13,
    Provision = 14,
    Search = 15,
    Gal = 16,
    AirSyncBase = 17,
    Settings = 18,
    DocumentLibrary = 19,
    ItemOperations = 20,
    ComposeMail = 21,
    Email2 = 22,
    Notes = 23,
    RightsManagement = 24,
}

pub const ALL_PAGES: [Page; 25] = [
    Page::AirSync,
    Page::Contacts,
    Page::Email,
    Page::AirNotify,
    Page::Calendar,
    Page::Move,
    Page::GetItemEstimate,
    Page::FolderHierarchy,
    Page::MeetingResponse,
    Page::Tasks,
    Page::ResolveRecipients,
    Page::ValidateCert,
    Page::Contacts2,
    Page::Ping,
    Page::Provision,
    Page::Search,
    Page::Gal,
    Page::AirSyncBase,
    Page::Settings,
    Page::DocumentLibrary,
    Page::ItemOperations,
    Page::ComposeMail,
    Page::Email2,
    Page::Notes,
    Page::RightsManagement,
];

impl Page {
    pub fn from_id(id: u8) -> Option<Page> {
        ALL_PAGES.get(id as usize).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Namespace name used for the page in XML renderings
    pub fn name(self) -> &'static str {
        match self {
            Page::AirSync => "AirSync",
            Page::Contacts => "Contacts",
            Page::Email => "Email",
            Page::AirNotify => "AirNotify",
            Page::Calendar => "Calendar",
            Page::Move => "Move",
            Page::GetItemEstimate => "GetItemEstimate",
            Page::FolderHierarchy => "FolderHierarchy",
            Page::MeetingResponse => "MeetingResponse",
            Page::Tasks => "Tasks",
            Page::ResolveRecipients => "ResolveRecipients",
            Page::ValidateCert => "ValidateCert",
            Page::Contacts2 => "Contacts2",
            Page::Ping => "Ping",
            Page::Provision => "Provision",
            Page::Search => "Search",
            Page::Gal => "GAL",
            Page::AirSyncBase => "AirSyncBase",
            Page::Settings => "Settings",
            Page::DocumentLibrary => "DocumentLibrary",
            Page::ItemOperations => "ItemOperations",
            Page::ComposeMail => "ComposeMail",
            Page::Email2 => "Email2",
            Page::Notes => "Notes",
            Page::RightsManagement => "RightsManagement",
        }
    }

    fn tags(self) -> &'static [&'static str] {
        match self {
            Page::AirSync => AIRSYNC,
            Page::Contacts => CONTACTS,
            Page::Email => EMAIL,
            Page::AirNotify => AIRNOTIFY,
            Page::Calendar => CALENDAR,
            Page::Move => MOVE,
            Page::GetItemEstimate => GET_ITEM_ESTIMATE,
            Page::FolderHierarchy => FOLDER_HIERARCHY,
            Page::MeetingResponse => MEETING_RESPONSE,
            Page::Tasks => TASKS,
            Page::ResolveRecipients => RESOLVE_RECIPIENTS,
            Page::ValidateCert => VALIDATE_CERT,
            Page::Contacts2 => CONTACTS2,
            Page::Ping => PING,
            Page::Provision => PROVISION,
            Page::Search => SEARCH,
            Page::Gal => GAL,
            Page::AirSyncBase => AIRSYNCBASE,
            Page::Settings => SETTINGS,
            Page::DocumentLibrary => DOCUMENT_LIBRARY,
            Page::ItemOperations => ITEM_OPERATIONS,
            Page::ComposeMail => COMPOSE_MAIL,
            Page::Email2 => EMAIL2,
            Page::Notes => NOTES,
            Page::RightsManagement => RIGHTS_MANAGEMENT,
        }
    }

    /// Tag name for a token (attribute and content bits already stripped)
    pub fn tag(self, token: u8) -> Option<&'static str> {
        let index = token.checked_sub(FIRST_TAG_TOKEN)? as usize;
        self.tags().get(index).copied().filter(|name| !name.is_empty())
    }

    /// Token for a tag name on this page
    pub fn token(self, tag: &str) -> Option<u8> {
        TOKENS.get(&self).and_then(|tags| tags.get(tag)).copied()
    }

    /// Resolve a page by its namespace name
    pub fn by_name(name: &str) -> Option<Page> {
        ALL_PAGES.iter().copied().find(|page| page.name() == name)
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reverse index from (page, tag name) to token, built once per process
static TOKENS: Lazy<HashMap<Page, HashMap<&'static str, u8>>> = Lazy::new(|| {
    ALL_PAGES
        .iter()
        .map(|page| {
            let tags = page
                .tags()
                .iter()
                .enumerate()
                .filter(|(_, name)| !name.is_empty())
                .map(|(offset, name)| (*name, FIRST_TAG_TOKEN + offset as u8))
                .collect();
            (*page, tags)
        })
        .collect()
});

const AIRSYNC: &[&str] = &[
    "Sync", "Responses", "Add", "Change", "Delete", "Fetch", "SyncKey", "ClientId",
    "ServerId", "Status", "Collection", "Class", "Version", "CollectionId", "GetChanges",
    "MoreAvailable", "WindowSize", "Commands", "Options", "FilterType", "Truncation",
    "RTFTruncation", "Conflict", "Collections", "ApplicationData", "DeletesAsMoves",
    "NotifyGUID", "Supported", "SoftDelete", "MIMESupport", "MIMETruncation", "Wait",
    "Limit", "Partial", "ConversationMode", "MaxItems", "HeartbeatInterval",
];

const CONTACTS: &[&str] = &[
    "Anniversary", "AssistantName", "AssistantPhoneNumber", "Birthday", "Body",
    "BodySize", "BodyTruncated", "Business2PhoneNumber", "BusinessAddressCity",
    "BusinessAddressCountry", "BusinessAddressPostalCode", "BusinessAddressState",
    "BusinessAddressStreet", "BusinessFaxNumber", "BusinessPhoneNumber",
    "CarPhoneNumber", "Categories", "Category", "Children", "Child", "CompanyName",
    "Department", "Email1Address", "Email2Address", "Email3Address", "FileAs",
    "FirstName", "Home2PhoneNumber", "HomeAddressCity", "HomeAddressCountry",
    "HomeAddressPostalCode", "HomeAddressState", "HomeAddressStreet", "HomeFaxNumber",
    "HomePhoneNumber", "JobTitle", "LastName", "MiddleName", "MobilePhoneNumber",
    "OfficeLocation", "OtherAddressCity", "OtherAddressCountry",
    "OtherAddressPostalCode", "OtherAddressState", "OtherAddressStreet", "PagerNumber",
    "RadioPhoneNumber", "Spouse", "Suffix", "Title", "WebPage", "YomiCompanyName",
    "YomiFirstName", "YomiLastName", "CompressedRTF", "Picture", "Alias",
    "WeightedRank",
];

const EMAIL: &[&str] = &[
    "Attachment", "Attachments", "AttName", "AttSize", "Att0Id", "AttMethod",
    "AttRemoved", "Body", "BodySize", "BodyTruncated", "DateReceived", "DisplayName",
    "DisplayTo", "Importance", "MessageClass", "Subject", "Read", "To", "Cc", "From",
    "ReplyTo", "AllDayEvent", "Categories", "Category", "DTStamp", "EndTime",
    "InstanceType", "BusyStatus", "Location", "MeetingRequest", "Organizer",
    "RecurrenceId", "Reminder", "ResponseRequested", "Recurrences", "Recurrence",
    "Recurrence_Type", "Recurrence_Until", "Recurrence_Occurrences",
    "Recurrence_Interval", "Recurrence_DayOfWeek", "Recurrence_DayOfMonth",
    "Recurrence_WeekOfMonth", "Recurrence_MonthOfYear", "StartTime", "Sensitivity",
    "TimeZone", "GlobalObjId", "ThreadTopic", "MIMEData", "MIMETruncated", "MIMESize",
    "InternetCPID", "Flag", "FlagStatus", "ContentClass", "FlagType", "CompleteTime",
    "DisallowNewTimeProposal",
];

const AIRNOTIFY: &[&str] = &[
    "Notify", "Notification", "Version", "Lifetime", "DeviceInfo", "Enable", "Folder",
    "ServerId", "DeviceAddress", "ValidCarrierProfiles", "CarrierProfile", "Status",
    "Responses", "Devices", "Device", "Id", "Expiry", "NotifyGUID",
    "DeviceFriendlyName",
];

const CALENDAR: &[&str] = &[
    "TimeZone", "AllDayEvent", "Attendees", "Attendee", "Email", "Name", "Body",
    "BodyTruncated", "BusyStatus", "Categories", "Category", "CompressedRTF", "DtStamp",
    "EndTime", "Exception", "Exceptions", "Deleted", "ExceptionStartTime", "Location",
    "MeetingStatus", "OrganizerEmail", "OrganizerName", "Recurrence", "Type", "Until",
    "Occurrences", "Interval", "DayOfWeek", "DayOfMonth", "WeekOfMonth", "MonthOfYear",
    "Reminder", "Sensitivity", "Subject", "StartTime", "UID", "AttendeeStatus",
    "AttendeeType", "Attachment", "Attachments", "AttName", "AttSize", "AttOid",
    "AttMethod", "AttRemoved", "DisplayName", "DisallowNewTimeProposal",
    "ResponseRequested", "AppointmentReplyTime", "ResponseType", "CalendarType",
    "IsLeapMonth", "FirstDayOfWeek", "OnlineMeetingConfLink",
    "OnlineMeetingExternalLink", "ClientUid",
];

const MOVE: &[&str] = &[
    "MoveItems", "Move", "SrcMsgId", "SrcFldId", "DstFldId", "Response", "Status",
    "DstMsgId",
];

const GET_ITEM_ESTIMATE: &[&str] = &[
    "GetItemEstimate", "Version", "Collections", "Collection", "Class", "CollectionId",
    "DateTime", "Estimate", "Response", "Status",
];

const FOLDER_HIERARCHY: &[&str] = &[
    "Folders", "Folder", "DisplayName", "ServerId", "ParentId", "Type", "Response",
    "Status", "ContentClass", "Changes", "Add", "Delete", "Update", "SyncKey",
    "FolderCreate", "FolderDelete", "FolderUpdate", "FolderSync", "Count", "Version",
];

const MEETING_RESPONSE: &[&str] = &[
    "CalendarId", "CollectionId", "MeetingResponse", "RequestId", "Request", "Result",
    "Status", "UserResponse", "Version", "InstanceId",
];

const TASKS: &[&str] = &[
    "Body", "BodySize", "BodyTruncated", "Categories", "Category", "Complete",
    "DateCompleted", "DueDate", "UtcDueDate", "Importance", "Recurrence", "Type",
    "Start", "Until", "Occurrences", "Interval", "DayOfMonth", "DayOfWeek",
    "WeekOfMonth", "MonthOfYear", "Regenerate", "DeadOccur", "ReminderSet",
    "ReminderTime", "Sensitivity", "StartDate", "UtcStartDate", "Subject",
    "CompressedRTF", "OrdinalDate", "SubOrdinalDate", "CalendarType", "IsLeapMonth",
    "FirstDayOfWeek",
];

const RESOLVE_RECIPIENTS: &[&str] = &[
    "ResolveRecipients", "Response", "Status", "Type", "Recipient", "DisplayName",
    "EmailAddress", "Certificates", "Certificate", "MiniCertificate", "Options", "To",
    "CertificateRetrieval", "RecipientCount", "MaxCertificates",
    "MaxAmbiguousRecipients", "CertificateCount", "Availability", "StartTime",
    "EndTime", "MergedFreeBusy", "Picture", "MaxSize", "Data", "MaxPictures",
];

const VALIDATE_CERT: &[&str] = &[
    "ValidateCert", "Certificates", "Certificate", "CertificateChain", "CheckCRL",
    "Status",
];

const CONTACTS2: &[&str] = &[
    "CustomerId", "GovernmentId", "IMAddress", "IMAddress2", "IMAddress3",
    "ManagerName", "CompanyMainPhone", "AccountName", "NickName", "MMS",
];

const PING: &[&str] = &[
    "Ping", "AutdState", "Status", "HeartbeatInterval", "Folders", "Folder", "Id",
    "Class", "MaxFolders",
];

const PROVISION: &[&str] = &[
    "Provision", "Policies", "Policy", "PolicyType", "PolicyKey", "Data", "Status",
    "RemoteWipe", "EASProvisionDoc", "DevicePasswordEnabled",
    "AlphanumericDevicePasswordRequired", "RequireStorageCardEncryption",
    "PasswordRecoveryEnabled", "", "AttachmentsEnabled", "MinDevicePasswordLength",
    "MaxInactivityTimeDeviceLock", "MaxDevicePasswordFailedAttempts",
    "MaxAttachmentSize", "AllowSimpleDevicePassword", "DevicePasswordExpiration",
    "DevicePasswordHistory", "AllowStorageCard", "AllowCamera",
    "RequireDeviceEncryption", "AllowUnsignedApplications",
    "AllowUnsignedInstallationPackages", "MinDevicePasswordComplexCharacters",
    "AllowWiFi", "AllowTextMessaging", "AllowPOPIMAPEmail", "AllowBluetooth",
    "AllowIrDA", "RequireManualSyncWhenRoaming", "AllowDesktopSync",
    "MaxCalendarAgeFilter", "AllowHTMLEmail", "MaxEmailAgeFilter",
    "MaxEmailBodyTruncationSize", "MaxEmailHTMLBodyTruncationSize",
    "RequireSignedSMIMEMessages", "RequireEncryptedSMIMEMessages",
    "RequireSignedSMIMEAlgorithm", "RequireEncryptionSMIMEAlgorithm",
    "AllowSMIMEEncryptionAlgorithmNegotiation", "AllowSMIMESoftCerts", "AllowBrowser",
    "AllowConsumerEmail", "AllowRemoteDesktop", "AllowInternetSharing",
    "UnapprovedInROMApplicationList", "ApplicationName", "ApprovedApplicationList",
    "Hash", "AccountOnlyRemoteWipe",
];

const SEARCH: &[&str] = &[
    "Search", "Stores", "Store", "Name", "Query", "Options", "Range", "Status",
    "Response", "Result", "Properties", "Total", "EqualTo", "Value", "And", "Or",
    "FreeText", "SubstringOp", "DeepTraversal", "LongId", "RebuildResults", "LessThan",
    "GreaterThan", "Schema", "Supported", "UserName", "Password", "ConversationId",
    "Picture", "MaxSize", "MaxPictures",
];

const GAL: &[&str] = &[
    "DisplayName", "Phone", "Office", "Title", "Company", "Alias", "FirstName",
    "LastName", "HomePhone", "MobilePhone", "EmailAddress", "Picture", "Status",
    "Data",
];

const AIRSYNCBASE: &[&str] = &[
    "BodyPreference", "Type", "TruncationSize", "AllOrNone", "", "Body", "Data",
    "EstimatedDataSize", "Truncated", "Attachments", "Attachment", "DisplayName",
    "FileReference", "Method", "ContentId", "ContentLocation", "IsInline",
    "NativeBodyType", "ContentType", "Preview", "BodyPartPreference", "BodyPart",
    "Status", "Add", "Delete", "ClientId", "Content", "Location", "Annotation",
    "Street", "City", "State", "Country", "PostalCode", "Latitude", "Longitude",
    "Accuracy", "Altitude", "AltitudeAccuracy", "LocationUri", "InstanceId",
];

const SETTINGS: &[&str] = &[
    "Settings", "Status", "Get", "Set", "Oof", "OofState", "StartTime", "EndTime",
    "OofMessage", "AppliesToInternal", "AppliesToExternalKnown",
    "AppliesToExternalUnknown", "Enabled", "ReplyMessage", "BodyType",
    "DevicePassword", "Password", "DeviceInformation", "Model", "IMEI",
    "FriendlyName", "OS", "OSLanguage", "PhoneNumber", "UserInformation",
    "EmailAddresses", "SmtpAddress", "UserAgent", "EnableOutboundSMS",
    "MobileOperator", "PrimarySmtpAddress", "Accounts", "Account", "AccountId",
    "AccountName", "UserDisplayName", "SendDisabled", "",
    "RightsManagementInformation",
];

const DOCUMENT_LIBRARY: &[&str] = &[
    "LinkId", "DisplayName", "IsFolder", "CreationDate", "LastModifiedDate", "IsHidden",
    "ContentLength", "ContentType",
];

const ITEM_OPERATIONS: &[&str] = &[
    "ItemOperations", "Fetch", "Store", "Options", "Range", "Total", "Properties",
    "Data", "Status", "Response", "Version", "Schema", "Part", "EmptyFolderContents",
    "DeleteSubFolders", "UserName", "Password", "Move", "DstFldId", "ConversationId",
    "MoveAlways",
];

const COMPOSE_MAIL: &[&str] = &[
    "SendMail", "SmartForward", "SmartReply", "SaveInSentItems", "ReplaceMime", "",
    "Source", "FolderId", "ItemId", "LongId", "InstanceId", "Mime", "ClientId",
    "Status", "AccountId",
];

const EMAIL2: &[&str] = &[
    "UmCallerID", "UmUserNotes", "UmAttDuration", "UmAttOrder", "ConversationId",
    "ConversationIndex", "LastVerbExecuted", "LastVerbExecutionTime", "ReceivedAsBcc",
    "Sender", "CalendarType", "IsLeapMonth", "AccountId", "FirstDayOfWeek",
    "MeetingMessageType", "", "IsDraft", "Bcc", "Send",
];

const NOTES: &[&str] = &[
    "Subject", "MessageClass", "LastModifiedDate", "Categories", "Category",
];

const RIGHTS_MANAGEMENT: &[&str] = &[
    "RightsManagementSupport", "RightsManagementTemplates", "RightsManagementTemplate",
    "RightsManagementLicense", "EditAllowed", "ReplyAllowed", "ReplyAllAllowed",
    "ForwardAllowed", "ModifyRecipientsAllowed", "ExtractAllowed", "PrintAllowed",
    "ExportAllowed", "ProgrammaticAccessAllowed", "Owner", "ContentExpiryDate",
    "TemplateID", "TemplateName", "TemplateDescription", "ContentOwner",
    "RemoveRightsManagementDistribution",
];
