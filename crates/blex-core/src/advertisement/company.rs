//! Well-known Bluetooth SIG company identifiers seen in manufacturer data.

const COMPANIES: &[(u16, &str)] = &[
    (0x0006, "Microsoft"),
    (0x000A, "Qualcomm"),
    (0x000F, "Broadcom"),
    (0x001D, "Qualcomm"),
    (0x0046, "MediaTek"),
    (0x004C, "Apple"),
    (0x008C, "Qualcomm"),
    (0x00B8, "Qualcomm"),
    (0x00D7, "Qualcomm"),
    (0x00D8, "Qualcomm"),
    (0x00E0, "Google"),
    (0x011A, "Qualcomm"),
    (0x011C, "Baidu"),
    (0x013A, "Tencent"),
    (0x0157, "Huami"),
    (0x018E, "Fitbit"),
    (0x01AB, "Facebook"),
    (0x022F, "Huami"),
    (0x025C, "NetEase"),
    (0x027D, "Huawei"),
    (0x02C5, "Lenovo"),
    (0x038F, "Xiaomi"),
    (0x03E3, "Qualcomm"),
    (0x072F, "OnePlus"),
    (0x0764, "Mobvoi"),
    (0x079A, "Oppo"),
    (0x0837, "Vivo"),
];

/// Display name for a company identifier, if it is one we know.
pub fn company_name(company_id: u16) -> Option<&'static str> {
    COMPANIES
        .binary_search_by_key(&company_id, |(id, _)| *id)
        .ok()
        .map(|index| COMPANIES[index].1)
}
